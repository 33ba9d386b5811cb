use crate::copier::ImageCopier;
use crate::error::{Error, Result};
use crate::events::{EventSink, FAILED_COPYING_IMAGES_REASON};
use crate::image_reference::Registry;
use crate::pod_template;
use crate::state::ControllerContext;
use crate::store::WorkloadStore;
use crate::workload::{Workload, WorkloadKey};
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::{WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s client");
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to Kubernetes API server with version {}.{}",
        api_server_info.major, api_server_info.minor
    );
    Ok(client)
}

/// How a successful reconciliation attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The workload does not exist anymore.
    Gone,
    /// Every image already references the backup registry.
    Unchanged,
    /// Images were copied and the rewritten workload was stored.
    Patched,
}

/// Mirrors the images of one workload per call. Callers must not run two attempts for the
/// same workload concurrently; the kube-runtime controller guarantees this.
pub struct Reconciler<S, C, E> {
    backup: Registry,
    store: S,
    copier: C,
    events: E,
}

impl<S, C, E> Reconciler<S, C, E>
where
    C: ImageCopier,
    E: EventSink,
{
    pub fn new(backup: Registry, store: S, copier: C, events: E) -> Self {
        Self {
            backup,
            store,
            copier,
            events,
        }
    }

    /// Fetches the workload, rewrites its pod template in memory and stores it only if every
    /// image was copied. The write is conditioned on the resource version that was read.
    pub async fn reconcile<W: Workload>(&self, key: &WorkloadKey) -> Result<Outcome>
    where
        S: WorkloadStore<W>,
    {
        let kind = W::kind_name();
        let Some(mut workload) = self.store.get(key).await? else {
            info!("{} {} is gone, stop reconciling", kind, key);
            return Ok(Outcome::Gone);
        };

        let before = workload.clone();
        let rewritten = match workload.pod_template_mut() {
            Some(template) => pod_template::rewrite(template, &self.backup, &self.copier).await,
            None => Ok(false),
        };

        if let Err(error) = rewritten {
            if error.emits_warning() {
                self.events
                    .warn(&before, FAILED_COPYING_IMAGES_REASON, &error.to_string())
                    .await;
            }
            return Err(error);
        }

        if workload == before {
            debug!("All images of {} {} reference the backup registry", kind, key);
            return Ok(Outcome::Unchanged);
        }

        info!("Patching images in {} {}", kind, key);
        self.store.patch(key, &before, &workload).await?;
        Ok(Outcome::Patched)
    }
}

pub async fn run(client: Client, ctx: Arc<ControllerContext>) {
    futures::join!(
        run_controller::<Deployment>(client.clone(), ctx.clone()),
        run_controller::<DaemonSet>(client, ctx),
    );
}

async fn run_controller<W: Workload>(client: Client, ctx: Arc<ControllerContext>) {
    let kind = W::kind_name();
    info!(
        "Starting {} controller with concurrency {}",
        kind, ctx.settings.concurrency
    );

    let api: Api<W> = Api::all(client);
    let (reader, writer) = reflector::store();
    let workloads = generation_changes(
        watcher(api, watcher::Config::default())
            .default_backoff()
            .reflect(writer),
    );

    Controller::for_stream(workloads, reader)
        .with_config(controller::Config::default().concurrency(ctx.settings.concurrency))
        .shutdown_on_signal()
        .run(reconcile::<W, _, _, _>, error_policy::<W, _, _, _>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!("Reconciled {} {}", kind, obj),
                Err(e) => warn!("Reconciliation of {} failed: {}", kind, e),
            }
        })
        .await;

    info!("{} controller stopped", kind);
}

/// Drops watch events that leave the generation untouched, such as status updates.
fn generation_changes<W, S>(events: S) -> impl Stream<Item = Result<W, watcher::Error>> + Send
where
    W: Workload,
    S: Stream<Item = Result<watcher::Event<W>, watcher::Error>> + Send,
{
    events
        .applied_objects()
        .predicate_filter(predicates::generation)
}

/// Entry point for the watch machinery: filters by namespace, then runs one attempt.
async fn reconcile<W, S, C, E>(obj: Arc<W>, ctx: Arc<ControllerContext<S, C, E>>) -> Result<Action>
where
    W: Workload,
    S: WorkloadStore<W>,
    C: ImageCopier,
    E: EventSink,
{
    let key = WorkloadKey::of(obj.as_ref());
    if !ctx.filter.eligible(&key.namespace) {
        debug!("Ignoring {} {} in ignored namespace", W::kind_name(), key);
        return Ok(Action::await_change());
    }

    ctx.reconciler.reconcile::<W>(&key).await?;
    Ok(Action::await_change())
}

fn error_policy<W, S, C, E>(obj: Arc<W>, error: &Error, ctx: Arc<ControllerContext<S, C, E>>) -> Action
where
    W: Workload,
{
    let key = WorkloadKey::of(obj.as_ref());
    match error {
        Error::Conflict => {
            debug!(
                "{} {} was modified concurrently, retrying",
                W::kind_name(),
                key
            );
            Action::requeue(ctx.settings.conflict_retry_interval())
        }
        _ => {
            warn!("Failed reconciling {} {}: {}", W::kind_name(), key, error);
            Action::requeue(ctx.settings.retry_interval())
        }
    }
}
