//! Axum router and listener startup.
//!
//! Routes:
//!
//! - `GET /health` reports lifecycle state and table sizes.
//! - `GET /socket.io/` upgrades into a multiplexed event session whose frames
//!   are `{"event": ..., "data": ...}` JSON objects.
//! - Every other path is validated against the API spec and, if valid,
//!   upgraded into a request session.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{HeaderMap, Method, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use relay_core::SessionKey;
use relay_settings::ServerSettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::channel::ChannelCore;
use crate::errors::{ChannelError, Result};
use crate::health::{self, HealthResponse};
use crate::spec::ParsedRequest;
use crate::tls::{self, TlsListener};

/// Build the router over a shared channel core.
pub fn router(core: Arc<ChannelCore>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/socket.io/", get(event_handler))
        .route("/", get(upgrade_handler))
        .route("/{*path}", get(upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}

/// Bind, then serve until `shutdown` fires.
pub(crate) async fn start(
    core: Arc<ChannelCore>,
    settings: &ServerSettings,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let addr = settings.bind_addr();
    let bind_error = |source| ChannelError::Bind {
        addr: addr.clone(),
        source,
    };
    let listener = TcpListener::bind(addr.as_str()).await.map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;
    let app = router(core);

    let task = match settings.tls_paths() {
        Some((cert, key)) => {
            let acceptor = tls::load_acceptor(&cert, &key)?;
            let listener = TlsListener::new(listener, acceptor).map_err(bind_error)?;
            tokio::spawn(async move {
                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await;
                if let Err(error) = served {
                    error!(%error, "server exited with error");
                }
            })
        }
        None => tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(error) = served {
                error!(%error, "server exited with error");
            }
        }),
    };
    Ok((local_addr, task))
}

/// GET /health
async fn health_handler(State(core): State<Arc<ChannelCore>>) -> Json<HealthResponse> {
    Json(health::health_check(
        core.started(),
        core.state(),
        core.live_sessions(),
        core.pending_requests(),
    ))
}

/// GET /socket.io/
async fn event_handler(State(core): State<Arc<ChannelCore>>, uri: Uri, upgrade: WebSocketUpgrade) -> Response {
    if !core.is_running() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Channel not connected").into_response();
    }
    let key = SessionKey::new();
    let url = uri.path().to_owned();
    upgrade.on_upgrade(move |socket| core.run_event_session(key, socket, url))
}

/// GET anything else: validate, then upgrade.
async fn upgrade_handler(
    State(core): State<Arc<ChannelCore>>,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !core.is_running() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Channel not connected").into_response();
    }
    let request = ParsedRequest::from_parts(&method, &uri, version, &headers);
    if !core.validate(&request) {
        warn!(method = %request.method, url = %request.url(), "request is not valid");
        return (StatusCode::NOT_FOUND, "Request Not Found").into_response();
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    info!(url = %request.url(), "upgrading request");
    let key = SessionKey::new();
    upgrade.on_upgrade(move |socket| async move {
        let _ = core.run_upgraded_session(key, socket, request).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{AllowAll, ApiSpec};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SPEC: &str = r#"{
        "openapi": "3.0.0",
        "paths": { "/events": { "get": {} } }
    }"#;

    fn make_core(validator: Arc<dyn crate::spec::SpecValidator>, running: bool) -> Arc<ChannelCore> {
        let core = Arc::new(ChannelCore::new(&ServerSettings::default(), validator));
        if running {
            core.open(0, CancellationToken::new());
        }
        core
    }

    async fn body_text(resp: Response) -> String {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = router(make_core(Arc::new(AllowAll), true));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["state"], "running");
        assert_eq!(parsed["sessions"], 0);
    }

    #[tokio::test]
    async fn invalid_request_is_not_found() {
        let spec = ApiSpec::from_json(SPEC).unwrap();
        let app = router(make_core(Arc::new(spec), true));
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(resp).await, "Request Not Found");
    }

    #[tokio::test]
    async fn unknown_subpath_is_not_found() {
        let spec = ApiSpec::from_json(SPEC).unwrap();
        let app = router(make_core(Arc::new(spec), true));
        let req = Request::builder()
            .method(Method::GET)
            .uri("/events/extra")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn valid_plain_request_is_rejected_as_non_upgrade() {
        let spec = ApiSpec::from_json(SPEC).unwrap();
        let core = make_core(Arc::new(spec), true);
        let app = router(core.clone());
        let req = Request::builder().uri("/events").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
        let queued = tokio::time::timeout(std::time::Duration::from_millis(50), core.receive()).await;
        assert!(queued.is_err());
    }

    #[tokio::test]
    async fn stopped_channel_is_unavailable() {
        let app = router(make_core(Arc::new(AllowAll), false));
        let req = Request::builder().uri("/events").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let settings = ServerSettings {
            port: taken.local_addr().unwrap().port(),
            ..ServerSettings::default()
        };
        let core = make_core(Arc::new(AllowAll), true);
        let err = start(core, &settings, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Bind { .. }));
    }
}
