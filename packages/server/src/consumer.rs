//! A [`BranchConsumer`] that keeps a flat object model and remembers every
//! load, for simulations and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tandem_branch::{CommitData, DeliveryError, LoadReason};
use tandem_common::CommitHash;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Model {
    loads: Vec<(CommitHash, LoadReason)>,
    objects: BTreeMap<String, Value>,
    rejecting: Option<String>,
}

#[derive(Debug, Default)]
pub struct RecordingConsumer {
    model: Mutex<Model>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every load with `reason` until [`accept`](Self::accept)
    pub async fn reject(&self, reason: impl Into<String>) {
        self.model.lock().await.rejecting = Some(reason.into());
    }

    pub async fn accept(&self) {
        self.model.lock().await.rejecting = None;
    }

    pub async fn loads(&self) -> Vec<(CommitHash, LoadReason)> {
        self.model.lock().await.loads.clone()
    }

    pub async fn objects(&self) -> BTreeMap<String, Value> {
        self.model.lock().await.objects.clone()
    }

    /// Apply a commit authored on this client
    pub async fn apply_local(&self, data: &CommitData) {
        let mut model = self.model.lock().await;
        model.objects.extend(data.core_objects.clone());
    }
}

#[async_trait]
impl tandem_sync::BranchConsumer for RecordingConsumer {
    async fn load_commit(&self, data: &CommitData, reason: LoadReason) -> Result<(), DeliveryError> {
        let mut model = self.model.lock().await;
        if let Some(why) = &model.rejecting {
            tracing::debug!("[RecordingConsumer] rejecting {}: {}", data.hash(), why);
            return Err(DeliveryError::Rejected(why.clone()));
        }
        model.objects.extend(data.core_objects.clone());
        model.loads.push((data.hash().clone(), reason));
        Ok(())
    }
}
