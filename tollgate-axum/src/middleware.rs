use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tollgate::{Action, BlockKind, ClientInfo, Decision, Scope, Tollgate};

use crate::{
    error::{Result, TollgateError},
    extractors::{client_info, peer_addr},
};

/// State for [`rate_limit`]: the service and the limit family to apply.
#[derive(Clone)]
pub struct RateLimitState {
    pub tollgate: Tollgate,
    pub action: Action,
}

impl RateLimitState {
    pub fn new(tollgate: Tollgate, action: Action) -> Self {
        Self { tollgate, action }
    }
}

/// Reject requests whose client IP is blocked or over its quota.
///
/// Install with `axum::middleware::from_fn_with_state`:
///
/// ```rust,no_run
/// use axum::{Router, routing::post};
/// use tollgate::{Action, Tollgate};
/// use tollgate_axum::{RateLimitState, rate_limit};
///
/// # fn example(tollgate: Tollgate) -> Router {
/// Router::new()
///     .route("/login", post(|| async { "ok" }))
///     .layer(axum::middleware::from_fn_with_state(
///         RateLimitState::new(tollgate, Action::Login),
///         rate_limit,
///     ))
/// # }
/// ```
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let client = client_info(request.headers(), peer_addr(request.extensions()));

    let decision = state
        .tollgate
        .check(state.action, Scope::Ip, &client.ip_address);

    if let Decision::Denied {
        retry_after_seconds,
    } = decision
    {
        if state.action == Action::Login {
            state
                .tollgate
                .record_login_blocked(&client, None, BlockKind::RateLimit);
        }
        return Err(TollgateError::TooManyAttempts {
            retry_after_seconds,
        });
    }

    request.extensions_mut().insert(client);
    Ok(next.run(request).await)
}

/// Check a limit from inside a handler, e.g. a per-user limit once the
/// request body has been parsed.
pub fn enforce(
    tollgate: &Tollgate,
    action: Action,
    scope: Scope,
    identifier: &str,
    client: &ClientInfo,
) -> Result<()> {
    match tollgate.check(action, scope, identifier) {
        Decision::Allowed { .. } => Ok(()),
        Decision::Denied {
            retry_after_seconds,
        } => {
            tracing::debug!(
                action = %action,
                scope = %scope,
                ip_address = %client.ip_address,
                "Rejected request over its limit"
            );
            if action == Action::Login {
                let email = (scope == Scope::User).then_some(identifier);
                tollgate.record_login_blocked(client, email, BlockKind::RateLimit);
            }
            Err(TollgateError::TooManyAttempts {
                retry_after_seconds,
            })
        }
    }
}
