use crate::workload::{Workload, WorkloadKey};
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use std::future::Future;
use tracing::warn;

pub static CONTROLLER_NAME: &str = "image-clone-controller";
pub static FAILED_COPYING_IMAGES_REASON: &str = "FailedCopyingImages";
static COPY_IMAGES_ACTION: &str = "CopyImages";

/// Sink for warning notifications attached to a workload.
pub trait EventSink: Send + Sync {
    /// Publishing is best effort, a failure to record is logged and otherwise ignored.
    fn warn<W: Workload>(
        &self,
        workload: &W,
        reason: &str,
        message: &str,
    ) -> impl Future<Output = ()> + Send;
}

pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

impl EventSink for KubeEventSink {
    async fn warn<W: Workload>(&self, workload: &W, reason: &str, message: &str) {
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: COPY_IMAGES_ACTION.to_string(),
            secondary: None,
        };

        if let Err(e) = self
            .recorder
            .publish(&event, &workload.object_ref(&()))
            .await
        {
            warn!(
                "Failed to record {} event for {} {}: {}",
                reason,
                W::kind_name(),
                WorkloadKey::of(workload),
                e
            );
        }
    }
}
