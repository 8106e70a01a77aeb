// THEORY:
// The HTTP handlers are a thin translation layer. Each one maps a request onto a
// single `Monitor` or `SettingsStore` call and maps the result back onto JSON.
//
// 1.  Lifecycle commands never fail. Redundant ones answer 200 with a message that
//     describes the state the monitor is already in.
// 2.  Input is validated at this boundary. Anything invalid is a 400 with an
//     `{"error": ...}` body, and nothing is changed.
// 3.  The video stream refuses to start unless monitoring is running, and says
//     whether that is because nobody started it or because the camera failed.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info};
use watchpost::{
    Alert, ConfigError, DeviceStatus, DispatchError, Notification, SmtpSettings, StatusReport,
    Threshold,
};

use crate::{AppState, mjpeg};

/// Shown instead of the stored SMTP password.
pub const PASSWORD_MASK: &str = "********";

const DEFAULT_SMTP_PORT: u16 = 465;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotStreaming(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::NotStreaming(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(e) if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            ApiError::Config(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            error!("{self}");
        } else {
            debug!(%status, "request rejected: {self}");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

fn missing_body(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(format!("Missing JSON body: {}", rejection.body_text()))
}

/// Runs a settings write on the blocking pool, since persisting touches the disk.
async fn write_settings<T, F>(app: &AppState, write: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppState) -> Result<T, ConfigError> + Send + 'static,
    T: Send + 'static,
{
    let app = app.clone();
    tokio::task::spawn_blocking(move || write(&app))
        .await
        .map_err(|e| ApiError::Internal(format!("settings writer failed: {e}")))?
        .map_err(ApiError::from)
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
}

fn status(message: &'static str) -> Json<StatusMessage> {
    Json(StatusMessage { status: message })
}

pub async fn liveness() -> Json<StatusMessage> {
    status("watchpost is running")
}

pub async fn start_monitoring(State(app): State<AppState>) -> Json<StatusMessage> {
    status(app.monitor.start().await.message())
}

pub async fn stop_monitoring(State(app): State<AppState>) -> Json<StatusMessage> {
    status(app.monitor.stop().await.message())
}

pub async fn pause_monitoring(State(app): State<AppState>) -> Json<StatusMessage> {
    status(app.monitor.pause().message())
}

pub async fn resume_monitoring(State(app): State<AppState>) -> Json<StatusMessage> {
    status(app.monitor.resume().message())
}

pub async fn monitoring_status(State(app): State<AppState>) -> Json<StatusReport> {
    Json(app.monitor.status())
}

#[derive(Debug, Serialize)]
pub struct ThresholdUpdated {
    pub status: &'static str,
    pub new_threshold: u8,
}

/// Accepts JSON integers and integer strings. Fractions and other types are rejected.
fn parse_threshold(body: &Value) -> Result<Threshold, ApiError> {
    let value = body
        .get("threshold")
        .filter(|v| !v.is_null())
        .ok_or_else(|| ApiError::BadRequest("Missing threshold value".to_string()))?;
    let raw = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|_| i64::MAX))
            .ok_or(ConfigError::ThresholdNotInteger)?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigError::ThresholdNotInteger)?,
        _ => return Err(ConfigError::ThresholdNotInteger.into()),
    };
    Ok(Threshold::new(raw)?)
}

pub async fn set_threshold(
    State(app): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ThresholdUpdated>, ApiError> {
    let Json(body) = body.map_err(missing_body)?;
    let threshold = parse_threshold(&body)?;
    // The live value is set while the store still holds its writer lock.
    write_settings(&app, move |app| {
        app.settings.update_then(
            |s| s.alert_threshold = threshold.get(),
            |s| app.monitor.set_threshold(s.threshold()),
        )
    })
    .await?;
    Ok(Json(ThresholdUpdated {
        status: "Threshold updated",
        new_threshold: threshold.get(),
    }))
}

pub async fn video_feed(State(app): State<AppState>) -> Result<Response, ApiError> {
    let state = app.monitor.state();
    if !state.is_active() {
        let reason = match state.device_status() {
            DeviceStatus::Unavailable(reason) => format!("camera unavailable: {reason}"),
            DeviceStatus::Unknown | DeviceStatus::Ok => "monitoring not active".to_string(),
        };
        return Err(ApiError::NotStreaming(reason));
    }

    let body = Body::from_stream(mjpeg::frame_stream(app.monitor.clone(), app.stream_poll));
    Ok((
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertBatch {
    pub alerts: Vec<Alert>,
}

pub async fn check_alerts(State(app): State<AppState>) -> Json<AlertBatch> {
    Json(AlertBatch {
        alerts: app.monitor.alerts().drain(),
    })
}

#[derive(Debug, Serialize)]
pub struct RecoveryEmail {
    pub recovery_email: Option<String>,
}

pub async fn get_recovery_email(State(app): State<AppState>) -> Json<RecoveryEmail> {
    Json(RecoveryEmail {
        recovery_email: app.settings.get().recovery_email,
    })
}

#[derive(Debug, Deserialize)]
pub struct RecoveryEmailUpdate {
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecoveryEmailUpdated {
    pub status: &'static str,
    pub new_email: String,
}

pub async fn update_recovery_email(
    State(app): State<AppState>,
    body: Result<Json<RecoveryEmailUpdate>, JsonRejection>,
) -> Result<Json<RecoveryEmailUpdated>, ApiError> {
    let Json(update) = body.map_err(missing_body)?;
    let email = update
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing email value".to_string()))?;
    let stored = email.clone();
    write_settings(&app, move |app| app.settings.set_recovery_email(stored)).await?;
    info!(%email, "recovery email updated");
    Ok(Json(RecoveryEmailUpdated {
        status: "Recovery email updated",
        new_email: email,
    }))
}

/// SMTP settings as the web client sends and receives them.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SmtpConfig {
    pub smtp_server: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

pub async fn get_smtp_config(State(app): State<AppState>) -> Json<SmtpConfig> {
    let config = match app.settings.get().smtp {
        Some(smtp) => SmtpConfig {
            smtp_server: Some(smtp.server),
            smtp_port: Some(smtp.port),
            smtp_user: Some(smtp.user),
            smtp_password: Some(PASSWORD_MASK.to_string()),
        },
        None => SmtpConfig {
            smtp_server: Some(String::new()),
            smtp_port: Some(DEFAULT_SMTP_PORT),
            smtp_user: Some(String::new()),
            smtp_password: Some(String::new()),
        },
    };
    Json(config)
}

pub async fn update_smtp_config(
    State(app): State<AppState>,
    body: Result<Json<SmtpConfig>, JsonRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let Json(config) = body.map_err(missing_body)?;
    let missing = || ApiError::BadRequest("Missing SMTP configuration fields".to_string());
    let (Some(server), Some(port), Some(user), Some(password)) = (
        config.smtp_server,
        config.smtp_port,
        config.smtp_user,
        config.smtp_password,
    ) else {
        return Err(missing());
    };

    write_settings(&app, move |app| {
        app.settings.update(|s| {
            // A client echoing the masked value back keeps the stored password.
            let keep_stored = password == PASSWORD_MASK;
            let password = match s.smtp.take() {
                Some(current) if keep_stored => current.password,
                _ => password,
            };
            s.smtp = Some(SmtpSettings {
                server,
                port,
                user,
                password,
            });
        })
    })
    .await?;
    info!("SMTP configuration updated");
    Ok(status("SMTP configuration updated"))
}

#[derive(Debug, Deserialize)]
pub struct TestNotificationRequest {
    pub to_email: Option<String>,
}

/// Queues a test message for the configured notifier.
pub async fn test_notification(
    State(app): State<AppState>,
    body: Result<Json<TestNotificationRequest>, JsonRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let Json(request) = body.map_err(missing_body)?;
    let to_email = request
        .to_email
        .or_else(|| app.settings.get().recovery_email)
        .ok_or_else(|| {
            ApiError::BadRequest("Missing destination email and no recovery email configured".to_string())
        })?;
    app.monitor.dispatcher().submit(Notification::Message {
        subject: "watchpost test notification".to_string(),
        body: "This is a test message from watchpost.".to_string(),
        to_email,
    })?;
    Ok(status("Test notification queued"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use axum::http::Request;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use watchpost::core_modules::frame_source::{TestPatternSource, UnavailableSource};
    use watchpost::{
        Monitor, MonitorConfig, NotificationDispatcher, Settings, SettingsStore, SourceFactory,
    };

    struct TestApp {
        state: AppState,
        _notifications: tokio::task::JoinHandle<()>,
    }

    fn app_with(factory: SourceFactory) -> (TestApp, mpsc::UnboundedReceiver<Notification>) {
        let (forward_tx, forward_rx) = mpsc::unbounded_channel();
        let notifier = Arc::new(Forwarding(forward_tx));
        let (dispatcher, handle) = NotificationDispatcher::spawn(notifier, 8);
        let settings = Arc::new(SettingsStore::in_memory(Settings::default()).unwrap());
        let monitor = Arc::new(Monitor::new(
            factory,
            dispatcher,
            settings.get().threshold(),
            MonitorConfig::default(),
        ));
        let state = AppState {
            monitor,
            settings,
            stream_poll: Duration::from_millis(2),
        };
        (
            TestApp {
                state,
                _notifications: handle,
            },
            forward_rx,
        )
    }

    struct Forwarding(mpsc::UnboundedSender<Notification>);

    impl watchpost::Notifier for Forwarding {
        fn deliver(&self, notification: &Notification) -> Result<(), DispatchError> {
            self.0
                .send(notification.clone())
                .map_err(|e| DispatchError::Delivery(e.to_string()))
        }
    }

    fn pattern_app() -> TestApp {
        let factory: SourceFactory = Arc::new(|| {
            Box::new(TestPatternSource::new(64, 48).with_frame_interval(Duration::from_millis(2)))
        });
        app_with(factory).0
    }

    async fn call(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(app.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn lifecycle_commands_report_status() {
        let app = pattern_app();

        let (code, body) = call(&app, get("/start_monitoring")).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "Monitoring started");
        let (_, body) = call(&app, get("/start_monitoring")).await;
        assert_eq!(body["status"], "Monitoring is already active");

        let (_, body) = call(&app, get("/pause_monitoring")).await;
        assert_eq!(body["status"], "Processing paused");
        let (_, body) = call(&app, get("/status")).await;
        assert_eq!(body["state"], "paused");
        let (_, body) = call(&app, get("/resume_monitoring")).await;
        assert_eq!(body["status"], "Processing resumed");

        let (_, body) = call(&app, get("/stop_monitoring")).await;
        assert_eq!(body["status"], "Monitoring stopped");
        let (code, body) = call(&app, get("/stop_monitoring")).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "Monitoring is not active");
    }

    #[tokio::test]
    async fn threshold_out_of_range_is_rejected_and_kept() {
        let app = pattern_app();
        let (code, body) = call(&app, post_json("/set_threshold", json!({"threshold": 150}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("between 0 and 100"));
        assert_eq!(app.state.monitor.state().threshold(), 10);
        assert_eq!(app.state.settings.get().alert_threshold, 10);
    }

    #[tokio::test]
    async fn threshold_accepts_integers_and_integer_strings() {
        let app = pattern_app();
        let (code, body) = call(&app, post_json("/set_threshold", json!({"threshold": "42"}))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({"status": "Threshold updated", "new_threshold": 42}));
        assert_eq!(app.state.monitor.state().threshold(), 42);

        let (code, _) = call(&app, post_json("/set_threshold", json!({"threshold": 0}))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(app.state.settings.get().alert_threshold, 0);
    }

    #[tokio::test]
    async fn threshold_rejects_missing_and_non_integer_values() {
        let app = pattern_app();
        for body in [json!({}), json!({"threshold": null}), json!({"threshold": 42.5}), json!({"threshold": "abc"}), json!({"threshold": [1]})] {
            let (code, _) = call(&app, post_json("/set_threshold", body.clone())).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "{body} should be rejected");
        }
        let request = Request::builder()
            .method("POST")
            .uri("/set_threshold")
            .body(Body::from("threshold=5"))
            .unwrap();
        let (code, _) = call(&app, request).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(app.state.monitor.state().threshold(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_threshold_updates_keep_saved_and_live_values_equal() {
        let app = pattern_app();
        let requests: Vec<_> = (0..40)
            .map(|threshold| {
                let router = router(app.state.clone());
                tokio::spawn(async move {
                    router
                        .oneshot(post_json("/set_threshold", json!({"threshold": threshold})))
                        .await
                        .unwrap()
                        .status()
                })
            })
            .collect();
        for request in requests {
            assert_eq!(request.await.unwrap(), StatusCode::OK);
        }
        assert_eq!(
            app.state.settings.get().alert_threshold,
            app.state.monitor.state().threshold()
        );
    }

    #[tokio::test]
    async fn video_feed_requires_running_monitor() {
        let app = pattern_app();
        let (code, body) = call(&app, get("/video_feed")).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "monitoring not active");
    }

    #[tokio::test]
    async fn video_feed_explains_a_failed_camera() {
        let factory: SourceFactory =
            Arc::new(|| Box::new(UnavailableSource::new("camera:0", "device busy")));
        let (app, _) = app_with(factory);
        app.state.monitor.start().await;
        for _ in 0..200 {
            if !app.state.monitor.state().is_active() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (code, body) = call(&app, get("/video_feed")).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "camera unavailable: could not open video device `camera:0`: device busy");
        let (_, status) = call(&app, get("/status")).await;
        assert_eq!(status["device"]["state"], "unavailable");
    }

    #[tokio::test]
    async fn video_feed_streams_jpeg_parts_until_stopped() {
        let app = pattern_app();
        app.state.monitor.start().await;

        let response = router(app.state.clone()).oneshot(get("/video_feed")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut chunks = response.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(5), chunks.next())
            .await
            .expect("a frame in time")
            .expect("stream open")
            .unwrap();
        let header_len = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".len();
        assert!(first.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(first.ends_with(b"\r\n"));
        let jpeg = &first[header_len..first.len() - 2];
        let decoded = image::load_from_memory(jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));

        app.state.monitor.stop().await;
        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            while chunks.next().await.is_some() {}
        })
        .await;
        assert!(ended.is_ok(), "stream should end once monitoring stops");
    }

    #[tokio::test]
    async fn check_alerts_drains_once() {
        let app = pattern_app();
        let (_, body) = call(&app, get("/check_alerts")).await;
        assert_eq!(body, json!({"alerts": []}));

        app.state.monitor.alerts().append(Alert {
            image: "data:image/jpeg;base64,AA==".to_string(),
            score: 33,
            timestamp: 1_700_000_000_000,
        });
        let (_, body) = call(&app, get("/check_alerts")).await;
        assert_eq!(body["alerts"][0]["score"], 33);
        assert_eq!(body["alerts"][0]["timestamp"], 1_700_000_000_000i64);
        let (_, body) = call(&app, get("/check_alerts")).await;
        assert_eq!(body["alerts"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn recovery_email_round_trip() {
        let app = pattern_app();
        let (_, body) = call(&app, get("/get_recovery_email")).await;
        assert_eq!(body, json!({"recovery_email": null}));

        let (code, _) = call(&app, post_json("/update_recovery_email", json!({}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, body) =
            call(&app, post_json("/update_recovery_email", json!({"email": "ops@example.com"}))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["new_email"], "ops@example.com");
        let (_, body) = call(&app, get("/get_recovery_email")).await;
        assert_eq!(body["recovery_email"], "ops@example.com");
    }

    #[tokio::test]
    async fn smtp_config_masks_and_keeps_the_password() {
        let app = pattern_app();
        let (_, body) = call(&app, get("/get_smtp_config")).await;
        assert_eq!(body["smtp_port"], 465);
        assert_eq!(body["smtp_server"], "");

        let config = json!({
            "smtp_server": "smtp.example.com",
            "smtp_port": 587,
            "smtp_user": "watchpost",
            "smtp_password": "hunter2"
        });
        let (code, _) = call(&app, post_json("/update_smtp_config", config)).await;
        assert_eq!(code, StatusCode::OK);

        let (_, body) = call(&app, get("/get_smtp_config")).await;
        assert_eq!(body["smtp_password"], PASSWORD_MASK);
        assert_eq!(body["smtp_port"], 587);

        // echoing the masked form back must not overwrite the secret
        let (code, _) = call(&app, post_json("/update_smtp_config", body)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(app.state.settings.get().smtp.unwrap().password, "hunter2");
    }

    #[tokio::test]
    async fn smtp_config_requires_every_field() {
        let app = pattern_app();
        let partial = json!({"smtp_server": "smtp.example.com", "smtp_port": 587});
        let (code, body) = call(&app, post_json("/update_smtp_config", partial)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing SMTP configuration fields");

        let zero_port = json!({
            "smtp_server": "smtp.example.com",
            "smtp_port": 0,
            "smtp_user": "u",
            "smtp_password": "p"
        });
        let (code, _) = call(&app, post_json("/update_smtp_config", zero_port)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(app.state.settings.get().smtp.is_none());
    }

    #[tokio::test]
    async fn test_notification_is_handed_to_the_notifier() {
        let factory: SourceFactory = Arc::new(|| Box::new(TestPatternSource::new(8, 8)));
        let (app, mut delivered) = app_with(factory);

        let (code, _) = call(&app, post_json("/test_notification", json!({}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, body) =
            call(&app, post_json("/test_notification", json!({"to_email": "ops@example.com"}))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "Test notification queued");

        let notification = tokio::time::timeout(Duration::from_secs(5), delivered.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(notification, Notification::Message { ref to_email, .. } if to_email == "ops@example.com"));
    }

    #[tokio::test]
    async fn liveness_answers() {
        let app = pattern_app();
        let (code, body) = call(&app, get("/test")).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "watchpost is running");
    }
}
