use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};

const UNKNOWN: &str = "unknown";

/// Caller address: first `X-Forwarded-For` entry, else the peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty());
        if let Some(first) = forwarded {
            return Ok(Self(first.to_string()));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN.to_string());
        Ok(Self(peer))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn resolve(request: Request<()>) -> String {
        let (mut parts, _) = request.into_parts();
        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &())
            .await
            .unwrap_or_else(|never| match never {});
        ip
    }

    #[tokio::test]
    async fn forwarded_header_wins_over_peer() {
        let mut request = Request::builder()
            .header("x-forwarded-for", " 203.0.113.7 , 10.0.0.1")
            .body(())
            .expect("request");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(resolve(request).await, "203.0.113.7");
    }

    #[tokio::test]
    async fn falls_back_to_peer_then_unknown() {
        let mut request = Request::builder().body(()).expect("request");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 4], 4000))));
        assert_eq!(resolve(request).await, "192.0.2.4");

        let bare = Request::builder().body(()).expect("request");
        assert_eq!(resolve(bare).await, UNKNOWN);
    }
}
