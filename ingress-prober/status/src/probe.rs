//! Executes a single probe request against a single pod.

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use linkerd_ingress_prober_core::{HASH_HEADER, PROBE_HEADER, PROBE_HEADER_VALUE};
use std::net::SocketAddr;
use tokio::{net::TcpStream, time};

/// How a gateway's response relates to the ingress version being probed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// The gateway serves the expected version, or cannot tell us otherwise.
    Ready,

    /// The gateway still serves another version of the ingress.
    Stale { hash: String },

    /// The gateway has no route for the ingress yet.
    Unavailable(StatusCode),
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ProbeError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("request failed: {0}")]
    Request(#[source] hyper::Error),

    #[error("connection closed before a response was received")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(time::Duration),

    #[error("invalid request: {0}")]
    Invalid(#[from] http::Error),
}

/// Describes one probe: which pod to dial and what to ask it for.
#[derive(Clone, Debug)]
pub(crate) struct ProbeRequest<'a> {
    pub addr: SocketAddr,
    pub url: &'a http::Uri,
    pub hash: &'a str,
    pub user_agent: &'a str,
}

/// Classifies a probe response.
///
/// A 404 or 5xx means the gateway has no route for the ingress yet. Otherwise, a hash header that
/// differs from the expected hash means the gateway serves an older version. Any other response is
/// treated as ready: gateways and load balancers that don't propagate the hash header would
/// otherwise never become ready.
pub(crate) fn verify(status: StatusCode, headers: &HeaderMap, expected: &str) -> Verdict {
    if status == StatusCode::NOT_FOUND || status.is_server_error() {
        return Verdict::Unavailable(status);
    }

    match headers.get(HASH_HEADER) {
        Some(hash) if !hash.is_empty() && hash.as_bytes() != expected.as_bytes() => {
            Verdict::Stale {
                hash: String::from_utf8_lossy(hash.as_bytes()).into_owned(),
            }
        }
        _ => Verdict::Ready,
    }
}

/// Sends a single probe, bounded by `timeout`.
///
/// The connection is made directly to the pod while the URL's authority is sent as the `Host`
/// header. The connection is never reused and is closed when the returned future completes or is
/// dropped.
pub(crate) async fn send(
    req: ProbeRequest<'_>,
    timeout: time::Duration,
) -> Result<http::response::Parts, ProbeError> {
    match time::timeout(timeout, exchange(req)).await {
        Ok(res) => res,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

async fn exchange(req: ProbeRequest<'_>) -> Result<http::response::Parts, ProbeError> {
    let ProbeRequest {
        addr,
        url,
        hash,
        user_agent,
    } = req;

    let request = http::Request::get(url.path_and_query().map_or("/", |pq| pq.as_str()))
        .header(
            header::HOST,
            url.authority().map_or("", |authority| authority.as_str()),
        )
        .header(header::USER_AGENT, user_agent)
        .header(
            HeaderName::from_static(PROBE_HEADER),
            HeaderValue::from_static(PROBE_HEADER_VALUE),
        )
        .header(HeaderName::from_static(HASH_HEADER), hash)
        .body(Empty::<Bytes>::new())?;

    let io = TcpStream::connect(addr)
        .await
        .map_err(|source| ProbeError::Connect { addr, source })?;
    let (mut tx, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(ProbeError::Handshake)?;

    // The connection is driven in place rather than spawned so that dropping this future (on
    // timeout or cancellation) tears it down.
    tokio::pin!(conn);
    let rsp = tokio::select! {
        rsp = tx.send_request(request) => rsp.map_err(ProbeError::Request)?,
        res = &mut conn => {
            res.map_err(ProbeError::Request)?;
            return Err(ProbeError::Closed);
        }
    };

    let (parts, _body) = rsp.into_parts();
    Ok(parts)
}
