// HTTP front end
//
// One route: `GET /<token>[?ip_address=<addr>]`. The handler builds an
// `Observation` and hands it to the `ChangeDetector`; everything else here is
// status mapping.
//
// Extractor rejections are not returned directly. An unreadable query rides
// along in the observation so the token is still checked first, and a path
// that does not decode cannot name a registered token.

use axum::Router;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use scrappy_core::address::client_ip;
use scrappy_core::{ChangeDetector, Error, Observation};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error};

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub detector: ChangeDetector,
    pub proxy_count: usize,
}

#[derive(Debug, Deserialize)]
struct ObserveParams {
    ip_address: Option<String>,
}

/// Error returned by the handler, mapped onto an HTTP status
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            other => {
                error!("Request failed: {}", other);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/:token", get(observe))
        .with_state(state)
}

/// Serve until `shutdown` completes
///
/// In-flight requests are allowed to finish before this returns.
pub async fn serve<S>(listener: TcpListener, state: AppState, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn observe(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<ObserveParams>, QueryRejection>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<&'static str, ApiError> {
    let forwarded_for = forwarded_for(&headers);
    let source_ip = client_ip(peer.ip(), forwarded_for.as_deref(), state.proxy_count);
    debug!("Ping from {}", source_ip);

    let token = match path {
        Ok(Path(token)) => token,
        Err(rejection) => {
            debug!("Unreadable token path from {}: {}", source_ip, rejection.body_text());
            return Err(ApiError(Error::not_found("Unknown token")));
        }
    };

    let observation = match query {
        Ok(Query(params)) => Observation::new(token, params.ip_address, source_ip),
        Err(rejection) => {
            Observation::new(token, None, source_ip).with_query_error(rejection.body_text())
        }
    };
    state.detector.observe(observation).await.map_err(ApiError)?;

    Ok("OK")
}

/// All `X-Forwarded-For` values, joined in arrival order
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}
