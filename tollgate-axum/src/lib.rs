//! # Tollgate Axum Integration
//!
//! This crate connects tollgate to Axum applications. It provides:
//!
//! - **Client extraction**: [`Client`] resolves the caller's IP from proxy headers and its user agent
//! - **Rate limiting**: [`rate_limit`] middleware returning a uniform `429 Too Many Requests`
//! - **Admin routes**: list, add and remove IP blocks, and read event statistics
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use axum::{Router, routing::post};
//! use tollgate::{Action, Tollgate};
//! use tollgate_axum::{Client, RateLimitState, rate_limit};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tollgate = Tollgate::builder().build()?;
//!
//!     let app = Router::new()
//!         .route("/login", post(login_handler))
//!         .layer(axum::middleware::from_fn_with_state(
//!             RateLimitState::new(tollgate.clone(), Action::Login),
//!             rate_limit,
//!         ))
//!         .nest("/admin/security", tollgate_axum::admin_router(tollgate));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//!
//! async fn login_handler(Client(client): Client) -> &'static str {
//!     // verify credentials, then call tollgate.record_login_failed(&client, ...)
//!     "ok"
//! }
//! ```
//!
//! The admin router has no authentication of its own. Mount it behind your
//! own authorization layer.

mod error;
mod extractors;
mod middleware;
mod routes;
mod types;

pub use error::{Result, TollgateError};
pub use extractors::client_info;
pub use middleware::{RateLimitState, enforce, rate_limit};
pub use types::{
    BlockRequest, BlockedIp, BlockedResponse, Client, EventsQuery, EventsResponse, StatsQuery,
};

use axum::Router;
use tollgate::Tollgate;

/// Create the security admin routes.
///
/// | Method | Path | Description |
/// |---|---|---|
/// | `GET` | `/blocked` | Active IP blocks |
/// | `POST` | `/blocked` | Block an IP |
/// | `DELETE` | `/blocked/{ip}` | Remove a block |
/// | `GET` | `/stats?window=hour\|day\|week` | Event statistics |
/// | `GET` | `/events?ip=..` or `?user=..&limit=..` | Recent events, newest first |
///
/// # Example
///
/// ```rust,no_run
/// # fn example(tollgate: tollgate::Tollgate) -> axum::Router {
/// axum::Router::new().nest("/admin/security", tollgate_axum::admin_router(tollgate))
/// # }
/// ```
pub fn admin_router(tollgate: Tollgate) -> Router {
    routes::create_admin_router(tollgate)
}
