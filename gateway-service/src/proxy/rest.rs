//! Streaming reverse proxy for REST upstreams.
//!
//! Forwards the full request over the shared HTTP client without buffering
//! either body, rewrites the Host header to the upstream host, and extends
//! the X-Forwarded-For chain with the client's real IP. Upstream 5xx and
//! transport failures feed the service's circuit breaker.

use crate::models::Service;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, Response as HttpResponse};
use axum::response::{IntoResponse, Response};
use gateway_core::error::GatewayError;
use gateway_core::observability::TraceSink;
use gateway_core::resilience::ServiceHealth;
use std::net::IpAddr;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Connection-scoped headers that must not be forwarded.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

pub async fn proxy_rest(
    client: &reqwest::Client,
    traces: &TraceSink,
    health: &ServiceHealth,
    service: &Service,
    request_id: &str,
    client_ip: Option<IpAddr>,
    request: Request,
) -> Response {
    if reqwest::Url::parse(&service.base_url).is_err() {
        traces.error(
            request_id,
            "REST",
            format!("Invalid upstream URL: {}", service.base_url),
        );
        return GatewayError::Internal(anyhow::anyhow!("Invalid upstream URL")).into_response();
    }

    traces.info(
        request_id,
        "REST",
        format!("Proxying to {}", service.base_url),
    );

    let target = build_target_url(&service.base_url, &request);
    let method = request.method().clone();
    let headers = forward_headers(request.headers(), client_ip);
    let body = reqwest::Body::wrap_stream(request.into_body().into_data_stream());

    let upstream = client
        .request(method, &target)
        .headers(headers)
        .body(body)
        .send()
        .await;

    match upstream {
        Ok(response) => {
            let status = response.status();
            if status.is_server_error() {
                health.record_failure();
                traces.error(request_id, "REST", format!("Upstream responded {status}"));
            } else {
                health.record_success();
            }

            let upstream_headers = response.headers().clone();
            let mut proxied =
                HttpResponse::new(Body::from_stream(response.bytes_stream()));
            *proxied.status_mut() = status;
            for (name, value) in upstream_headers.iter() {
                if !is_hop_by_hop(name) {
                    proxied.headers_mut().append(name.clone(), value.clone());
                }
            }
            proxied
        }
        Err(error) => {
            health.record_failure();
            traces.error(
                request_id,
                "REST",
                format!("Upstream transport error: {error}"),
            );
            GatewayError::UpstreamFailure(format!("upstream unreachable: {error}")).into_response()
        }
    }
}

/// Joins the upstream base with the inbound path and query; routes map the
/// exact public path onto the upstream.
fn build_target_url(base_url: &str, request: &Request) -> String {
    let mut target = format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        request.uri().path()
    );
    if let Some(query) = request.uri().query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Copies forwardable headers, dropping hop-by-hop ones and Host (the HTTP
/// client derives Host from the upstream URL), and extends the
/// X-Forwarded-For chain with the client's real IP.
fn forward_headers(headers: &HeaderMap, client_ip: Option<IpAddr>) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for (name, value) in headers {
        if name == header::HOST || is_hop_by_hop(name) {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }

    if let Some(ip) = client_ip {
        let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.is_empty() => format!("{existing}, {ip}"),
            _ => ip.to_string(),
        };
        if let Ok(value) = chain.parse() {
            forwarded.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
        }
    }

    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url_joins_path_and_query() {
        let request = Request::builder()
            .uri("/auth/login?lang=id")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            build_target_url("http://auth:9000/", &request),
            "http://auth:9000/auth/login?lang=id"
        );
    }

    #[test]
    fn test_forwarded_for_starts_chain() {
        let headers = HeaderMap::new();
        let forwarded = forward_headers(&headers, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(forwarded["x-forwarded-for"], "10.0.0.5");
    }

    #[test]
    fn test_forwarded_for_extends_chain() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(X_FORWARDED_FOR),
            "203.0.113.7".parse().unwrap(),
        );
        let forwarded = forward_headers(&headers, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(forwarded["x-forwarded-for"], "203.0.113.7, 10.0.0.5");
    }

    #[test]
    fn test_hop_by_hop_and_host_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "gateway.local".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());

        let forwarded = forward_headers(&headers, None);
        assert!(forwarded.get(header::HOST).is_none());
        assert!(forwarded.get(header::CONNECTION).is_none());
        assert_eq!(forwarded[header::ACCEPT], "application/json");
    }
}
