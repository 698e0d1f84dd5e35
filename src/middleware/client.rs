use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

const UNKNOWN: &str = "unknown";

/// Number of reverse proxies in front of the gateway whose forwarding
/// headers are believed. Zero means forwarding headers are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrustedProxyHops(pub usize);

/// Caller identifier used as the rate-limit key.
///
/// The TCP peer, unless `TrustedProxyHops` is installed as a request
/// extension with a non-zero count; see `client_identifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let TrustedProxyHops(hops) = parts
            .extensions
            .get::<TrustedProxyHops>()
            .copied()
            .unwrap_or_default();
        Ok(ClientId(client_identifier(&parts.headers, peer, hops)))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the caller address.
///
/// With `trusted_hops == 0` this is the TCP peer and headers are not read.
/// Otherwise the hop chain is `X-Forwarded-For` left to right followed by the
/// peer, and the caller is the entry just left of the last `trusted_hops`
/// entries. Proxies append on the right, so anything a client writes into the
/// header lands to the left of that position and is never used.
/// `X-Real-IP` is consulted only when trusted and no `X-Forwarded-For` exists.
pub fn client_identifier(headers: &HeaderMap, peer: Option<IpAddr>, trusted_hops: usize) -> String {
    let peer = peer.map(|ip| ip.to_string());
    if trusted_hops == 0 {
        return peer.unwrap_or_else(|| UNKNOWN.to_string());
    }

    let mut chain: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if chain.is_empty() {
        if let Some(real) = header(headers, "x-real-ip") {
            return real.to_string();
        }
    }
    chain.push(peer.as_deref().unwrap_or(UNKNOWN));

    let idx = chain.len().saturating_sub(trusted_hops + 1);
    chain[idx].to_string()
}
