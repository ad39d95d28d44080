use std::fmt;

/// Identifies an ingress resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IngressKey {
    pub namespace: String,
    pub name: String,
}

/// Whether a rule's hosts are reachable only from within the cluster or also from outside it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Visibility {
    #[default]
    ExternalIp,
    ClusterLocal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub hosts: Vec<String>,
    pub visibility: Visibility,
}

/// The view of an ingress needed to probe it.
///
/// The hash identifies one version of the ingress's routing rules. The prober treats it as an
/// opaque token: two versions with the same hash are assumed to be routed identically.
pub trait ProbeIngress: Send + Sync {
    fn key(&self) -> IngressKey;

    fn rules(&self) -> &[Rule];

    fn hash(&self) -> &str;
}

/// An owned [`ProbeIngress`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressSnapshot {
    pub key: IngressKey,
    pub rules: Vec<Rule>,
    pub hash: String,
}

// === impl IngressKey ===

impl IngressKey {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for IngressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl Visibility ===

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalIp => f.write_str("ExternalIP"),
            Self::ClusterLocal => f.write_str("ClusterLocal"),
        }
    }
}

// === impl IngressSnapshot ===

impl ProbeIngress for IngressSnapshot {
    fn key(&self) -> IngressKey {
        self.key.clone()
    }

    fn rules(&self) -> &[Rule] {
        &self.rules
    }

    fn hash(&self) -> &str {
        &self.hash
    }
}
