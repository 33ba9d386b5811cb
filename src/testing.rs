//! In-memory stand-ins for the cluster, the registries and the event recorder.

use crate::copier::ImageCopier;
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::image_reference::ImageReference;
use crate::store::WorkloadStore;
use crate::workload::{Workload, WorkloadKey};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

pub fn pod_template(containers: &[(&str, &str)]) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|(name, image)| Container {
                    name: name.to_string(),
                    image: Some(image.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
    }
}

fn metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        resource_version: Some("1".to_string()),
        ..Default::default()
    }
}

fn selector(name: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
        ..Default::default()
    }
}

pub fn deployment(namespace: &str, name: &str, containers: &[(&str, &str)]) -> Deployment {
    Deployment {
        metadata: metadata(namespace, name),
        spec: Some(DeploymentSpec {
            selector: selector(name),
            template: pod_template(containers),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn daemon_set(namespace: &str, name: &str, containers: &[(&str, &str)]) -> DaemonSet {
    DaemonSet {
        metadata: metadata(namespace, name),
        spec: Some(DaemonSetSpec {
            selector: selector(name),
            template: pod_template(containers),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn images<W: Workload>(workload: &W) -> Vec<String> {
    workload
        .pod_template()
        .and_then(|t| t.spec.as_ref())
        .map(|spec| {
            spec.containers
                .iter()
                .map(|c| c.image.clone().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

type Edit<W> = Box<dyn FnOnce(&mut W) + Send>;

/// Object store that enforces resource versions the way the API server does.
pub struct FakeStore<W> {
    objects: Mutex<BTreeMap<WorkloadKey, W>>,
    concurrent_edits: Mutex<Vec<Edit<W>>>,
    gets: Mutex<usize>,
    patches: Mutex<usize>,
}

impl<W: Workload> FakeStore<W> {
    pub fn with(objects: impl IntoIterator<Item = W>) -> Self {
        Self {
            objects: Mutex::new(
                objects
                    .into_iter()
                    .map(|obj| (WorkloadKey::of(&obj), obj))
                    .collect(),
            ),
            concurrent_edits: Mutex::new(Vec::new()),
            gets: Mutex::new(0),
            patches: Mutex::new(0),
        }
    }

    /// Applies `edit` as another writer would, right after the next read.
    pub fn edit_after_next_get(&self, edit: impl FnOnce(&mut W) + Send + 'static) {
        self.concurrent_edits.lock().unwrap().push(Box::new(edit));
    }

    pub fn stored(&self, key: &WorkloadKey) -> Option<W> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn gets(&self) -> usize {
        *self.gets.lock().unwrap()
    }

    pub fn patches(&self) -> usize {
        *self.patches.lock().unwrap()
    }

    fn bump_version(obj: &mut W) {
        let version = obj
            .meta()
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        obj.meta_mut().resource_version = Some((version + 1).to_string());
    }
}

impl<W: Workload> WorkloadStore<W> for FakeStore<W> {
    async fn get(&self, key: &WorkloadKey) -> Result<Option<W>> {
        *self.gets.lock().unwrap() += 1;
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(key) else {
            return Ok(None);
        };
        let read = stored.clone();

        for edit in self.concurrent_edits.lock().unwrap().drain(..) {
            edit(stored);
            Self::bump_version(stored);
        }
        Ok(Some(read))
    }

    async fn patch(&self, key: &WorkloadKey, before: &W, after: &W) -> Result<()> {
        *self.patches.lock().unwrap() += 1;
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| Error::Store(anyhow::anyhow!("{} not found", key)))?;

        if stored.resource_version() != before.resource_version() {
            return Err(Error::Conflict);
        }
        *stored = after.clone();
        Self::bump_version(stored);
        Ok(())
    }
}

/// Records every copy and fails for the configured source images.
#[derive(Default)]
pub struct FakeCopier {
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeCopier {
    pub fn failing_on(source: &str) -> Self {
        Self {
            failing: HashSet::from([source.to_string()]),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ImageCopier for FakeCopier {
    async fn copy(
        &self,
        source: &ImageReference,
        destination: &ImageReference,
    ) -> anyhow::Result<()> {
        let source = source.to_string();
        self.calls
            .lock()
            .unwrap()
            .push((source.clone(), destination.to_string()));
        if self.failing.contains(&source) {
            anyhow::bail!("registry returned error status 503 Service Unavailable");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: String,
    pub key: WorkloadKey,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct FakeEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl FakeEventSink {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for FakeEventSink {
    async fn warn<W: Workload>(&self, workload: &W, reason: &str, message: &str) {
        self.events.lock().unwrap().push(RecordedEvent {
            kind: W::kind_name().to_string(),
            key: WorkloadKey::of(workload),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
