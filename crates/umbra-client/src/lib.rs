//! # umbra-client
//!
//! The sync and delivery core of an Umbra client. It owns the local
//! database, polls swarm storage nodes and community servers for new
//! messages and config snapshots, merges config state deterministically
//! across devices, and drives durable background jobs for everything that
//! must survive a restart: message sends, config pushes, group invites and
//! promotions, and group key rotations.
//!
//! [`Client`] wires the pieces together for embedders; the individual
//! engines ([`SyncEngine`], [`Poller`], [`JobRunner`], the pipelines, and
//! [`GroupManager`]) are public for hosts that need finer control.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod groups;
pub mod jobs;
pub mod pipeline;
pub mod poller;
pub mod replay;
pub mod sync;
pub mod targets;

pub use config::ClientConfig;
pub use context::ClientContext;
pub use error::{ClientError, Result};
pub use events::{ClientEvent, NoopNotifier, Notifier, UserNotification};
pub use groups::{FailureDebouncer, GroupManager};
pub use jobs::{JobRunner, JobSpec};
pub use pipeline::{
    Destination, OutgoingAttachment, ProcessedMessage, ReceivePipeline, SendPipeline,
};
pub use poller::{PollDriver, PollResult, Poller};
pub use sync::SyncEngine;
pub use targets::{CommunityTarget, GroupSwarmTarget, UserSwarmTarget};

use std::sync::Arc;

use tracing::warn;

use umbra_net::Backend;
use umbra_shared::{AccountId, Identity};
use umbra_store::Database;

use crate::jobs::config_sync::ConfigSyncExecutor;
use crate::jobs::group_invite::GroupInviteExecutor;
use crate::jobs::group_promote::GroupPromoteExecutor;
use crate::jobs::message_send::MessageSendExecutor;

/// Install a global tracing subscriber. Respects `RUST_LOG`; defaults to
/// info with debug for this crate.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,umbra_client=debug")),
        )
        .init();
}

/// A fully wired client: context, sync engine, job runner with all
/// executors registered, send/receive pipelines, group manager, and one
/// poller per target kind.
pub struct Client {
    ctx: Arc<ClientContext>,
    sync: Arc<SyncEngine>,
    jobs: Arc<JobRunner>,
    receive: Arc<ReceivePipeline>,
    send: SendPipeline,
    groups: GroupManager,
    user_poller: Arc<Poller>,
    group_poller: Arc<Poller>,
    community_poller: Arc<Poller>,
}

impl Client {
    pub fn new(
        identity: Identity,
        db: Database,
        backend: Arc<dyn Backend>,
        config: ClientConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let user_poller = Poller::new(
            config.user_poll_min,
            config.user_poll_max,
            config.prune_failure_threshold,
        );
        let group_poller = Poller::new(
            config.group_poll_min,
            config.group_poll_max,
            config.prune_failure_threshold,
        );
        let community_poller = Poller::new(
            config.community_poll_min,
            config.community_poll_max,
            config.prune_failure_threshold,
        );
        let debouncer = FailureDebouncer::new(config.failure_debounce, notifier.clone());

        let ctx = ClientContext::new(identity, db, backend, config, notifier);
        let sync = SyncEngine::new(ctx.clone());
        let jobs = JobRunner::new(ctx.clone());
        jobs.register(Arc::new(ConfigSyncExecutor::new(sync.clone())));
        jobs.register(Arc::new(MessageSendExecutor::new(ctx.clone())));
        jobs.register(Arc::new(GroupInviteExecutor::new(
            ctx.clone(),
            sync.clone(),
            debouncer.clone(),
        )));
        jobs.register(Arc::new(GroupPromoteExecutor::new(
            ctx.clone(),
            sync.clone(),
            debouncer,
        )));

        let receive = Arc::new(ReceivePipeline::new(ctx.clone(), sync.clone(), jobs.clone()));
        let send = SendPipeline::new(ctx.clone(), sync.clone(), jobs.clone());
        let groups = GroupManager::new(ctx.clone(), sync.clone(), jobs.clone());

        Arc::new(Self {
            ctx,
            sync,
            jobs,
            receive,
            send,
            groups,
            user_poller,
            group_poller,
            community_poller,
        })
    }

    /// Start the job runner and register poll targets for the user's own
    /// swarm, every known group, and every joined community.
    pub fn start(&self) -> Result<()> {
        self.jobs.start();

        self.user_poller.add_target(Arc::new(UserSwarmTarget::new(
            self.ctx.clone(),
            self.sync.clone(),
            self.receive.clone(),
        )));

        let (groups, communities) = {
            let db = self.ctx.db();
            (db.list_groups()?, db.list_communities()?)
        };
        for group in groups {
            self.watch_group(group.id);
        }
        for community in communities {
            self.watch_community(&community.key);
        }
        Ok(())
    }

    /// Stop all poll loops and the job runner. Targets and pending jobs
    /// stay registered; `start` resumes where things left off.
    pub fn stop(&self) {
        self.user_poller.stop();
        self.group_poller.stop();
        self.community_poller.stop();
        self.jobs.stop();
    }

    /// Begin polling a group's swarm. Safe to call for a group that is
    /// already being watched.
    pub fn watch_group(&self, group: AccountId) {
        self.group_poller.add_target(Arc::new(GroupSwarmTarget::new(
            self.ctx.clone(),
            self.sync.clone(),
            self.receive.clone(),
            group,
        )));
    }

    pub fn unwatch_group(&self, group: &AccountId) {
        self.group_poller
            .remove_target(&format!("group:{}", group.to_hex()));
    }

    /// Begin polling a community server. Safe to call for a community that
    /// is already being watched.
    pub fn watch_community(&self, key: &str) {
        self.community_poller.add_target(Arc::new(CommunityTarget::new(
            self.ctx.clone(),
            self.receive.clone(),
            key,
        )));
    }

    pub fn unwatch_community(&self, key: &str) {
        self.community_poller
            .remove_target(&format!("community:{key}"));
    }

    /// Leave a group and stop polling its swarm.
    pub async fn leave_group(&self, group: &AccountId) -> Result<()> {
        if let Err(e) = self.groups.leave_group(*group).await {
            warn!(group = %group.short(), error = %e, "Leaving group failed");
            return Err(e);
        }
        self.unwatch_group(group);
        Ok(())
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn jobs(&self) -> &Arc<JobRunner> {
        &self.jobs
    }

    pub fn send(&self) -> &SendPipeline {
        &self.send
    }

    pub fn receive(&self) -> &Arc<ReceivePipeline> {
        &self.receive
    }

    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ClientEvent> {
        self.ctx.subscribe_events()
    }
}
