use crate::config::{Config, ControllerSettings};
use crate::controller::Reconciler;
use crate::copier::RegistryCopier;
use crate::events::KubeEventSink;
use crate::filter::NamespaceFilter;
use crate::store::KubeStore;
use std::env;

/// Shared, read-only state of all controllers.
pub struct ControllerContext<S = KubeStore, C = RegistryCopier, E = KubeEventSink> {
    pub(crate) reconciler: Reconciler<S, C, E>,
    pub(crate) filter: NamespaceFilter,
    pub(crate) settings: ControllerSettings,
}

impl ControllerContext {
    pub fn new(config: &Config, kube_client: kube::Client) -> Self {
        let reconciler = Reconciler::new(
            config.backup_registry.clone(),
            KubeStore::new(kube_client.clone()),
            RegistryCopier::new(
                config.insecure_registries.clone(),
                config.controller.transfer_timeout(),
            ),
            KubeEventSink::new(kube_client, env::var("POD_NAME").ok()),
        );

        Self {
            reconciler,
            filter: NamespaceFilter::new(
                config.self_namespace(),
                config.ignored_namespaces.iter().cloned(),
            ),
            settings: config.controller.clone(),
        }
    }
}
