use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};
use chrono::{Duration, Utc};
use tollgate::{StatsWindow, Tollgate};

use crate::{
    error::{Result, TollgateError},
    types::*,
};

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 1000;

pub fn create_admin_router(tollgate: Tollgate) -> Router {
    Router::new()
        .route("/blocked", get(list_blocked_handler).post(block_handler))
        .route("/blocked/{ip}", delete(unblock_handler))
        .route("/stats", get(stats_handler))
        .route("/events", get(events_handler))
        .with_state(tollgate)
}

async fn list_blocked_handler(State(tollgate): State<Tollgate>) -> Json<BlockedResponse> {
    let mut blocked: Vec<BlockedIp> = tollgate
        .blocked()
        .into_iter()
        .map(|(ip, entry)| BlockedIp::new(ip, entry))
        .collect();
    blocked.sort_by(|a, b| a.ip.cmp(&b.ip));

    Json(BlockedResponse { blocked })
}

async fn block_handler(
    State(tollgate): State<Tollgate>,
    Json(request): Json<BlockRequest>,
) -> Result<impl IntoResponse> {
    let ip = request.ip.trim();
    if ip.is_empty() {
        return Err(TollgateError::BadRequest("ip must not be empty".to_string()));
    }

    let duration = match request.duration_seconds {
        Some(seconds) => i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .filter(|duration| Utc::now().checked_add_signed(*duration).is_some())
            .ok_or_else(|| TollgateError::BadRequest("duration_seconds is too large".to_string()))?,
        None => tollgate.config().emergency.block_duration,
    };

    let entry = tollgate.block(ip, &request.reason, duration);
    Ok((StatusCode::CREATED, Json(BlockedIp::new(ip, entry))))
}

async fn unblock_handler(
    State(tollgate): State<Tollgate>,
    Path(ip): Path<String>,
) -> Result<StatusCode> {
    if tollgate.unblock(&ip) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TollgateError::NotFound(format!("{ip} is not blocked")))
    }
}

async fn stats_handler(
    State(tollgate): State<Tollgate>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse> {
    let window = match query.window.as_deref() {
        Some(window) => window.parse::<StatsWindow>().map_err(TollgateError::BadRequest)?,
        None => StatsWindow::Hour,
    };

    Ok(Json(tollgate.stats(window)))
}

async fn events_handler(
    State(tollgate): State<Tollgate>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);

    let events = match (query.ip.as_deref(), query.user.as_deref()) {
        (Some(ip), None) => tollgate.events_for_ip(ip, limit),
        (None, Some(user)) => tollgate.events_for_user(user, limit),
        _ => {
            return Err(TollgateError::BadRequest(
                "exactly one of ip or user is required".to_string(),
            ));
        }
    };

    Ok(Json(EventsResponse { events }))
}
