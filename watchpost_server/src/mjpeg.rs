use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use tracing::{debug, warn};
use watchpost::Monitor;

pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Wraps one JPEG image as a part of the multipart stream.
pub fn part(jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + 2);
    buf.put_slice(PART_HEADER);
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Emits the latest published frame as JPEG parts until monitoring stops.
///
/// A missing or already-sent frame is not an error: the stream waits `poll` and looks
/// again. Frames that fail to encode are skipped.
pub fn frame_stream(
    monitor: Arc<Monitor>,
    poll: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream! {
        let mut last_sequence: Option<u64> = None;
        while monitor.state().is_active() {
            let fresh = monitor
                .frames()
                .snapshot()
                .filter(|frame| Some(frame.sequence) != last_sequence);
            let Some(frame) = fresh else {
                tokio::time::sleep(poll).await;
                continue;
            };
            last_sequence = Some(frame.sequence);

            match tokio::task::spawn_blocking(move || frame.encode_jpeg()).await {
                Ok(Ok(jpeg)) => yield Ok(part(&jpeg)),
                Ok(Err(e)) => warn!("stream frame skipped: {e}"),
                Err(e) => warn!("stream encoder task failed: {e}"),
            }
        }
        debug!("monitoring inactive, video stream closed");
    }
}
