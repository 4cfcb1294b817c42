use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header::FORWARDED, request::Parts, HeaderMap, StatusCode},
};
use forwarded_header_value::ForwardedHeaderValue;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// The address of the client that made a request.
///
/// Proxies report the original client through the `Forwarded` or
/// `X-Forwarded-For` headers. Without them the peer address of the
/// connection is used.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientIp(pub IpAddr);

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(value) = headers.get(FORWARDED).and_then(|v| v.to_str().ok()) {
        if let Some(ip) = ForwardedHeaderValue::from_forwarded(value)
            .ok()
            .and_then(|forwarded| forwarded.remotest_forwarded_for_ip())
        {
            return Some(ip);
        }
    }

    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|value| ForwardedHeaderValue::from_x_forwarded_for(value).ok())
        .and_then(|forwarded| forwarded.remotest_forwarded_for_ip())
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ip) = forwarded_ip(&parts.headers) {
            return Ok(Self(ip));
        }

        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(address)| Self(address.ip()))
            .ok_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cannot determine client address.",
            ))
    }
}

#[cfg(test)]
mod test {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED, HeaderValue::from_static("for=192.0.2.60;proto=http"));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("198.51.100.17"));

        assert_eq!(Some("192.0.2.60".parse().unwrap()), forwarded_ip(&headers));
    }

    #[test]
    fn x_forwarded_for_is_used_without_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.195, 70.41.3.18"),
        );

        assert_eq!(Some("203.0.113.195".parse().unwrap()), forwarded_ip(&headers));
    }

    #[test]
    fn no_headers_means_no_forwarded_ip() {
        assert_eq!(None, forwarded_ip(&HeaderMap::new()));
    }
}
