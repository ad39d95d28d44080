//! The gateway side of the probe protocol.
//!
//! A gateway that has applied an ingress version appends that version's hash to probe requests
//! routed through it. The request then reaches a handler that echoes the hash back so that the
//! prober can tell which version the gateway serves.

use bytes::Bytes;
use http::{header, HeaderName, Request, Response, StatusCode};
use http_body_util::Full;
use linkerd_ingress_prober_core::{
    HASH_HEADER, KUBELET_PROBE_HEADER, KUBE_PROBE_USER_AGENT_PREFIX, PROBE_HEADER,
    PROBE_HEADER_VALUE,
};

/// Indicates whether the request is an ingress readiness probe.
pub fn is_probe<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(PROBE_HEADER)
        .is_some_and(|v| v.as_bytes() == PROBE_HEADER_VALUE.as_bytes())
}

/// Indicates whether the request was sent by the kubelet.
pub fn is_kubelet_probe<B>(req: &Request<B>) -> bool {
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .is_some_and(|v| v.as_bytes().starts_with(KUBE_PROBE_USER_AGENT_PREFIX.as_bytes()));
    user_agent
        || req
            .headers()
            .get(KUBELET_PROBE_HEADER)
            .is_some_and(|v| !v.is_empty())
}

/// Answers an ingress probe by echoing its hash header.
///
/// A probe without a hash cannot be matched to an ingress version and is rejected.
pub fn probe_response<B>(req: &Request<B>) -> Response<Full<Bytes>> {
    match req.headers().get(HASH_HEADER).filter(|v| !v.is_empty()) {
        Some(hash) => {
            let mut rsp = Response::new(Full::default());
            rsp.headers_mut()
                .insert(HeaderName::from_static(HASH_HEADER), hash.clone());
            rsp
        }
        None => {
            let msg = format!("a probe request must contain a non-empty {HASH_HEADER:?} header");
            let mut rsp = Response::new(Full::new(Bytes::from(msg)));
            *rsp.status_mut() = StatusCode::BAD_REQUEST;
            rsp
        }
    }
}

/// Removes the hash header from requests that are forwarded to applications.
pub fn strip_hash_header<B>(req: &mut Request<B>) {
    req.headers_mut().remove(HASH_HEADER);
}
