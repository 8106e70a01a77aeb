pub mod alert_log;
pub mod alert_throttle;
pub mod contours;
pub mod frame;
pub mod frame_source;
pub mod image_ops;
pub mod motion_detector;
pub mod shared_frame_buffer;
