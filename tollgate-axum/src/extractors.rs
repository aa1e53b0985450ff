use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use axum_extra::headers::{HeaderMapExt, UserAgent};
use tollgate::{ClientInfo, UNKNOWN};

use crate::types::Client;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";
const CF_CONNECTING_IP: &str = "cf-connecting-ip";

/// Resolve the client address and user agent from request headers.
///
/// The address is taken from the first `x-forwarded-for` entry, then
/// `x-real-ip`, then `cf-connecting-ip`, then the socket peer if known.
pub fn client_info(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientInfo {
    let ip_address = header_str(headers, FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(headers, REAL_IP).map(str::trim).filter(|ip| !ip.is_empty()))
        .or_else(|| {
            header_str(headers, CF_CONNECTING_IP)
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN.to_string());

    let user_agent = headers
        .typed_get::<UserAgent>()
        .map(|ua| ua.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());

    ClientInfo::new(ip_address, user_agent)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub(crate) fn peer_addr(extensions: &axum::http::Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Already resolved by the rate limit middleware
        if let Some(info) = parts.extensions.get::<ClientInfo>() {
            return Ok(Client(info.clone()));
        }
        Ok(Client(client_info(&parts.headers, peer_addr(&parts.extensions))))
    }
}
