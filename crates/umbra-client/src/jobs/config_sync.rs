//! Executor that pushes a dirty config object to its owner's swarm.

use std::sync::Arc;

use async_trait::async_trait;

use umbra_store::Job;

use crate::error::{from_bytes, Result};
use crate::jobs::{ConfigSyncDetails, JobExecutor, JobOutcome, VARIANT_CONFIG_SYNC};
use crate::sync::SyncEngine;

pub struct ConfigSyncExecutor {
    sync: Arc<SyncEngine>,
}

impl ConfigSyncExecutor {
    pub fn new(sync: Arc<SyncEngine>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl JobExecutor for ConfigSyncExecutor {
    fn variant(&self) -> &'static str {
        VARIANT_CONFIG_SYNC
    }

    async fn run(&self, job: &Job) -> Result<JobOutcome> {
        let details: ConfigSyncDetails = from_bytes(&job.details)?;
        // A clean object means a concurrent push already landed; that still
        // completes this job.
        self.sync
            .push_pending(&details.owner, details.namespace)
            .await?;
        Ok(JobOutcome::Success)
    }
}
