use crate::error::{Error, Result};
use crate::workload::{Workload, WorkloadKey};
use anyhow::Context;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::{Map, Value, json};
use std::future::Future;
use tracing::debug;

pub static FIELD_MANAGER: &str = "image-clone-controller";

/// Read and conditional-write access to stored workloads of one kind.
pub trait WorkloadStore<W: Workload>: Send + Sync {
    /// Returns `None` if the workload does not exist (anymore).
    fn get(&self, key: &WorkloadKey) -> impl Future<Output = Result<Option<W>>> + Send;

    /// Writes the difference between `before` and `after`, on the condition that the stored
    /// object still has the resource version of `before`. A mismatch is `Error::Conflict`.
    fn patch(
        &self,
        key: &WorkloadKey,
        before: &W,
        after: &W,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl<W: Workload> WorkloadStore<W> for KubeStore {
    async fn get(&self, key: &WorkloadKey) -> Result<Option<W>> {
        let api: Api<W> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get_opt(&key.name)
            .await
            .with_context(|| format!("Failed to read {} {}", W::kind_name(), key))
            .map_err(Error::Store)
    }

    async fn patch(&self, key: &WorkloadKey, before: &W, after: &W) -> Result<()> {
        let api: Api<W> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = optimistic_merge_patch(before, after)?;

        debug!("Patching {} {} with patch {}", W::kind_name(), key, patch);

        match api
            .patch(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => Err(Error::Conflict),
            Err(e) => Err(Error::Store(anyhow::Error::new(e).context(format!(
                "Failed to patch {} {}",
                W::kind_name(),
                key
            )))),
        }
    }
}

/// Builds a JSON merge patch from `before` to `after` that carries the resource version of
/// `before`, so the API server rejects it if anyone else wrote the object in between.
pub fn optimistic_merge_patch<W: Workload>(before: &W, after: &W) -> Result<Value> {
    let resource_version = before
        .resource_version()
        .context("Object has no resourceVersion to lock on")
        .map_err(Error::Store)?;

    let to_value = |obj: &W| {
        serde_json::to_value(obj)
            .with_context(|| format!("Failed to serialize {}", W::kind_name()))
            .map_err(Error::Store)
    };
    let mut patch = merge_diff(&to_value(before)?, &to_value(after)?);

    if !patch.is_object() {
        patch = json!({});
    }
    if let Some(fields) = patch.as_object_mut() {
        let metadata = fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert(
                "resourceVersion".to_string(),
                Value::String(resource_version),
            );
        }
    }

    Ok(patch)
}

/// RFC 7396 diff: objects are compared key by key, removed keys become `null`, everything
/// else (including arrays) is replaced wholesale when it differs.
fn merge_diff(before: &Value, after: &Value) -> Value {
    match (before, after) {
        (Value::Object(before), Value::Object(after)) => {
            let mut diff = Map::new();
            for (key, old) in before {
                match after.get(key) {
                    Some(new) if new != old => {
                        diff.insert(key.clone(), merge_diff(old, new));
                    }
                    Some(_) => {}
                    None => {
                        diff.insert(key.clone(), Value::Null);
                    }
                }
            }
            for (key, new) in after {
                if !before.contains_key(key) {
                    diff.insert(key.clone(), new.clone());
                }
            }
            Value::Object(diff)
        }
        _ => after.clone(),
    }
}
