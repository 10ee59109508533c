use crate::api::AppState;
use crate::error::AppError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use ipnetwork::IpNetwork;
use std::collections::BTreeMap;
use std::net::IpAddr;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Headers never copied into an outcome record.
const SECRET_HEADERS: [&str; 4] = [API_KEY_HEADER, "authorization", "cookie", "proxy-authorization"];

/// Rejects mail requests whose `X-API-Key` does not match the configured key.
/// A blank configured key disables the check.
///
/// # Errors
/// Returns `AppError::Forbidden` on a missing or mismatched key.
pub async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    if state.settings.is_api_key_auth_enabled() {
        let provided = req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(state.settings.api_key.as_str()) {
            return Err(AppError::Forbidden);
        }
    }
    Ok(next.run(req).await)
}

/// Works out the originating client address behind reverse proxies.
#[derive(Clone, Debug, Default)]
pub struct ClientIpResolver {
    trusted_proxies: Vec<IpNetwork>,
}

impl ClientIpResolver {
    #[must_use]
    pub const fn new(trusted_proxies: Vec<IpNetwork>) -> Self {
        Self { trusted_proxies }
    }

    /// Forwarding headers are only believed when the TCP peer is a trusted
    /// proxy. `X-Real-IP` wins, then the right-most `X-Forwarded-For` entry
    /// outside the trusted ranges.
    #[must_use]
    pub fn resolve(&self, headers: &HeaderMap, peer_addr: IpAddr) -> IpAddr {
        if !self.is_trusted(&peer_addr) {
            return peer_addr;
        }

        if let Some(real_ip) =
            headers.get("x-real-ip").and_then(|v| v.to_str().ok()).and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return real_ip;
        }

        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|xff| {
                xff.rsplit(',').filter_map(|s| s.trim().parse::<IpAddr>().ok()).find(|ip| !self.is_trusted(ip))
            })
            .unwrap_or(peer_addr)
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(*ip))
    }
}

/// First value of every header that is valid UTF-8, minus credentials.
#[must_use]
pub fn sanitize_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .filter(|name| !SECRET_HEADERS.contains(&name.as_str()))
        .filter_map(|name| {
            let value = headers.get(name)?.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
