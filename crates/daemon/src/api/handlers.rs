/// HTTP request handlers

use super::rate_limit::{ClientLimiter, RateLimitError};
use super::responses::*;
use anonjump_common::JumpError;
use anonjump_core::{JumpService, PeerSetStats, TrustReport};
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JumpService>,
    pub limiter: Arc<ClientLimiter>,
}

impl AppState {
    pub fn new(service: Arc<JumpService>, limiter: ClientLimiter) -> Self {
        Self {
            service,
            limiter: Arc::new(limiter),
        }
    }
}

/// Hosts files are served as plain text
fn hosts_text(body: Vec<u8>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Handler for GET /
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    debug!("GET /");

    let service = &state.service;
    let snapshots = service.peers().snapshot().await;

    let mut subscriptions = vec!["/hosts.txt".to_string(), "/peer-hosts.txt".to_string()];
    subscriptions.extend(
        snapshots
            .iter()
            .map(|peer| format!("/peer-{}-hosts.txt", peer.name)),
    );

    Json(StatusResponse {
        name: service.name().to_string(),
        address: service.own_address().await,
        transport: service.transport_kind().to_string(),
        running: service.is_running().await,
        local_records: service.local().len(),
        peers: snapshots.iter().map(PeerStatusResponse::from).collect(),
        peer_totals: PeerSetStats::from_snapshots(&snapshots).into(),
        announces: service
            .announces()
            .entries()
            .await
            .into_iter()
            .map(AnnounceResponseEntry::from)
            .collect(),
        pending_registrations: service
            .registrations()
            .submissions()
            .await
            .into_iter()
            .map(PendingRegistrationResponse::from)
            .collect(),
        rate_limit: state.limiter.stats().await.into(),
        subscriptions,
    })
}

/// Handler for GET /hosts.txt
pub async fn hosts_file(State(state): State<AppState>) -> Response {
    debug!("GET /hosts.txt");
    hosts_text(state.service.local().serialize())
}

/// Handler for GET /peer-hosts.txt
pub async fn peer_hosts_file(State(state): State<AppState>) -> Response {
    debug!("GET /peer-hosts.txt");
    hosts_text(state.service.aggregate().await)
}

/// Handler for GET /peer-<name>-hosts.txt
pub async fn single_peer_hosts_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, AppError> {
    debug!("GET /{}", file);

    let name = file
        .strip_prefix("peer-")
        .and_then(|rest| rest.strip_suffix("-hosts.txt"))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::not_found(format!("no such file: {}", file)))?;

    let body = state
        .service
        .peer_hosts_file(name)
        .await
        .ok_or_else(|| AppError::not_found(format!("unknown peer: {}", name)))?;

    Ok(hosts_text(body))
}

/// Handler for GET /trust
pub async fn trust(
    State(state): State<AppState>,
    Query(query): Query<TrustQuery>,
) -> Json<Vec<TrustReport>> {
    debug!("GET /trust");

    match query.name {
        Some(name) => Json(vec![state.service.trust_report(&name).await]),
        None => Json(state.service.trust_reports().await),
    }
}

/// Handler for POST /announce
pub async fn announce(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Form(form): Form<AnnounceForm>,
) -> Result<Json<AnnounceResponse>, AppError> {
    debug!("POST /announce from {}", client);
    state.limiter.check(client.ip()).await?;

    let accepted = state
        .service
        .announces()
        .announce(&form.host_name, &form.host_host)
        .await?;

    Ok(Json(AnnounceResponse {
        accepted,
        address: form.host_host,
    }))
}

/// Handler for POST /hostadd
pub async fn host_add(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Form(form): Form<HostAddForm>,
) -> Result<Json<HostAddResponse>, AppError> {
    debug!("POST /hostadd from {}", client);
    state.limiter.check(client.ip()).await?;

    state
        .service
        .registrations()
        .submit(&form.host_name, &form.host_destination, &form.host_description)
        .await?;

    Ok(Json(HostAddResponse {
        queued: true,
        name: form.host_name.trim().to_lowercase(),
    }))
}

/// Handler for GET /jump, /jump.cgi and /cgi-bin/jump.cgi
pub async fn jump(
    State(state): State<AppState>,
    Query(query): Query<JumpQuery>,
) -> Result<Response, AppError> {
    let name = query
        .a
        .ok_or_else(|| AppError::not_found("missing jump target"))?;
    debug!("GET jump {}", name);

    let location = state
        .service
        .jump(&name)
        .ok_or_else(|| AppError::not_found(format!("{} is not in our hosts file", name)))?;
    let location = HeaderValue::from_str(&location)
        .map_err(|_| AppError::internal(format!("unusable redirect for {}", name)))?;

    Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response())
}

/// Handler for GET /recheck
pub async fn recheck(State(state): State<AppState>) -> Json<RecheckResponse> {
    info!("Forced recheck of all peers requested");
    Json(state.service.force_refresh().await.into())
}

/// Application error type
#[derive(Debug)]
pub struct AppError {
    message: String,
    status_code: StatusCode,
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::NOT_FOUND,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("HTTP error: {}", self.message);
        } else {
            debug!("HTTP {}: {}", self.status_code, self.message);
        }

        let body = Json(ErrorResponse::new(
            self.message,
            self.status_code.as_u16(),
        ));

        (self.status_code, body).into_response()
    }
}

impl From<JumpError> for AppError {
    fn from(err: JumpError) -> Self {
        let status_code = match &err {
            JumpError::NotFound(_) => StatusCode::NOT_FOUND,
            JumpError::Validation(_) => StatusCode::BAD_REQUEST,
            JumpError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            JumpError::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            message: err.to_string(),
            status_code,
        }
    }
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        Self {
            message: err.to_string(),
            status_code: StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
