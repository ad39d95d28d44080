use crate::{Rule, Visibility};
use std::collections::{BTreeMap, BTreeSet};

/// Holds cluster metadata.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// E.g. "cluster.local"
    pub dns_domain: String,
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self {
            dns_domain: "cluster.local".to_string(),
        }
    }
}

impl ClusterInfo {
    /// Returns every name under which the given hosts may be requested from within the cluster.
    ///
    /// A cluster-local host such as `svc.ns.svc.cluster.local` may also be reached as `svc.ns.svc`
    /// and `svc.ns`. Shortened forms are only included when their last label can be a top-level
    /// domain.
    pub fn expanded_hosts<'h>(&self, hosts: impl IntoIterator<Item = &'h str>) -> BTreeSet<String> {
        let suffixes = [
            String::new(),
            format!(".{}", self.dns_domain),
            format!(".svc.{}", self.dns_domain),
        ];

        let mut expanded = BTreeSet::new();
        for host in hosts {
            for suffix in &suffixes {
                let trimmed = if suffix.is_empty() {
                    host
                } else {
                    match host.strip_suffix(suffix.as_str()) {
                        Some(trimmed) if !trimmed.is_empty() => trimmed,
                        _ => continue,
                    }
                };
                if has_valid_tld(trimmed) {
                    expanded.insert(trimmed.to_string());
                }
            }
        }
        expanded
    }

    /// Groups an ingress's expanded hosts by the gateways that serve each rule's visibility.
    ///
    /// Gateways are identified by an arbitrary key. A rule whose visibility has no gateways
    /// contributes no hosts.
    pub fn hosts_per_visibility<K>(
        &self,
        rules: &[Rule],
        gateways: &BTreeMap<Visibility, BTreeSet<K>>,
    ) -> BTreeMap<K, BTreeSet<String>>
    where
        K: Clone + Ord,
    {
        let mut by_gateway = BTreeMap::<K, BTreeSet<String>>::new();
        for rule in rules {
            let Some(keys) = gateways.get(&rule.visibility) else {
                continue;
            };
            let hosts = self.expanded_hosts(rule.hosts.iter().map(String::as_str));
            for key in keys {
                by_gateway
                    .entry(key.clone())
                    .or_default()
                    .extend(hosts.iter().cloned());
            }
        }
        by_gateway
    }
}

/// A top-level domain must be a valid DNS-1123 label that is not entirely numeric.
fn has_valid_tld(host: &str) -> bool {
    let tld = host.rsplit('.').next().unwrap_or(host);
    if tld.is_empty() || tld.len() > 63 {
        return false;
    }
    let bytes = tld.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(&bytes[0]) || !alnum(&bytes[bytes.len() - 1]) {
        return false;
    }
    if !bytes.iter().all(|b| alnum(b) || *b == b'-') {
        return false;
    }
    !bytes.iter().all(u8::is_ascii_digit)
}
