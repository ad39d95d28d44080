use anyhow::{Context, Result};
use linkerd_ingress_prober_core::{IngressKey, IngressSnapshot, Rule, Visibility};
use linkerd_ingress_prober_k8s_api::{self as k8s, IngressVisibility, ResourceExt};
use sha2::{Digest, Sha256};

/// Captures the probed view of an ingress resource.
///
/// The snapshot's hash identifies the ingress's spec: it is the hex-encoded SHA-256 digest of the
/// spec's JSON encoding, so any change to the spec produces a new version to be probed.
pub fn snapshot(ingress: &k8s::Ingress) -> Result<IngressSnapshot> {
    let namespace = ingress
        .namespace()
        .context("ingress must have a namespace")?;
    let key = IngressKey::new(namespace, ingress.name_unchecked());

    let rules = ingress
        .spec
        .rules
        .iter()
        .map(|rule| Rule {
            hosts: rule.hosts.clone(),
            visibility: match rule.visibility {
                Some(IngressVisibility::ClusterLocal) => Visibility::ClusterLocal,
                Some(IngressVisibility::ExternalIp) | None => Visibility::ExternalIp,
            },
        })
        .collect();

    let spec = serde_json::to_vec(&ingress.spec).context("failed to encode ingress spec")?;
    let hash = hex::encode(Sha256::digest(&spec));

    Ok(IngressSnapshot { key, rules, hash })
}
