use std::collections::BTreeSet;

/// Namespace the backup registry runs in.
pub static REGISTRY_NAMESPACE: &str = "registry";

/// Namespaces that are never reconciled, in addition to the backup registry's namespace.
pub static SYSTEM_NAMESPACES: [&str; 2] = [
    "kube-system",
    "local-path-storage", // kind storage provisioner
];

/// Decides which namespaces are eligible for reconciliation. Built once at startup and only
/// read afterwards.
#[derive(Debug, Clone)]
pub struct NamespaceFilter {
    ignored: BTreeSet<String>,
    self_namespace: Option<String>,
}

impl NamespaceFilter {
    pub fn new<I, S>(self_namespace: Option<String>, extra_ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ignored = SYSTEM_NAMESPACES
            .iter()
            .copied()
            .chain(std::iter::once(REGISTRY_NAMESPACE))
            .map(String::from)
            .chain(extra_ignored.into_iter().map(Into::into))
            .collect();

        Self {
            ignored,
            self_namespace: self_namespace.filter(|ns| !ns.is_empty()),
        }
    }

    pub fn eligible(&self, namespace: &str) -> bool {
        eligible(namespace, &self.ignored, self.self_namespace.as_deref())
    }
}

pub fn eligible(namespace: &str, ignored: &BTreeSet<String>, self_namespace: Option<&str>) -> bool {
    !ignored.contains(namespace) && self_namespace != Some(namespace)
}
