//! Executor that delivers an admin promotion to one member.
//!
//! A promotion shares the group's identity seed, so only a device holding
//! it (an existing admin) can run this job. Terminal failure is reported
//! through the same debouncer as failed invites.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use umbra_shared::protocol::{Content, GroupPromote};
use umbra_shared::{envelope, AccountId, ConfigNamespace, GroupRole, GroupRoleStatus};
use umbra_store::Job;

use crate::context::{now_ms, ClientContext};
use crate::error::{from_bytes, ClientError, Result};
use crate::groups::debounce::FailureDebouncer;
use crate::jobs::{GroupPromoteDetails, JobExecutor, JobOutcome, VARIANT_GROUP_PROMOTE};
use crate::sync::SyncEngine;

pub struct GroupPromoteExecutor {
    ctx: Arc<ClientContext>,
    sync: Arc<SyncEngine>,
    debouncer: Arc<FailureDebouncer>,
}

impl GroupPromoteExecutor {
    pub fn new(
        ctx: Arc<ClientContext>,
        sync: Arc<SyncEngine>,
        debouncer: Arc<FailureDebouncer>,
    ) -> Self {
        Self {
            ctx,
            sync,
            debouncer,
        }
    }
}

#[async_trait]
impl JobExecutor for GroupPromoteExecutor {
    fn variant(&self) -> &'static str {
        VARIANT_GROUP_PROMOTE
    }

    async fn run(&self, job: &Job) -> Result<JobOutcome> {
        let details: GroupPromoteDetails = from_bytes(&job.details)?;
        let seed = {
            let db = self.ctx.db();
            db.get_group(&details.group)?
                .identity_seed
                .ok_or(ClientError::NotAdmin(details.group))?
        };

        let content = Content::GroupPromote(GroupPromote {
            group: details.group,
            identity_seed: seed,
        })
        .to_bytes()?;
        let sealed = envelope::seal(&content, self.ctx.identity(), &details.member.key)?;
        self.ctx
            .snode()
            .store(
                None,
                &details.member,
                ConfigNamespace::Default,
                &sealed,
                self.ctx.config().message_ttl_ms,
                now_ms(),
            )
            .await?;

        apply_role(
            &self.ctx,
            &self.sync,
            details.group,
            details.member,
            GroupRole::Admin,
            GroupRoleStatus::Accepted,
        )
        .await?;
        debug!(group = %details.group.short(), member = %details.member.short(), "Promotion delivered");
        Ok(JobOutcome::Success)
    }

    async fn on_permanent_failure(&self, job: &Job) -> Result<()> {
        let details: GroupPromoteDetails = from_bytes(&job.details)?;
        self.ctx
            .db()
            .set_group_member_status(&details.group, &details.member, GroupRoleStatus::Failed)?;
        self.sync
            .update(
                &details.group,
                umbra_config::GroupMembersConfig::new,
                |config: &mut umbra_config::GroupMembersConfig, now| {
                    config.set_role_status(&details.member, GroupRoleStatus::Failed, now);
                },
            )
            .await?;
        self.debouncer.record(details.group, details.member);
        Ok(())
    }
}

async fn apply_role(
    ctx: &ClientContext,
    sync: &SyncEngine,
    group: AccountId,
    member: AccountId,
    role: GroupRole,
    status: GroupRoleStatus,
) -> Result<()> {
    {
        let db = ctx.db();
        db.set_group_member_role(&group, &member, role)?;
        db.set_group_member_status(&group, &member, status)?;
    }
    sync.update(
        &group,
        umbra_config::GroupMembersConfig::new,
        |config: &mut umbra_config::GroupMembersConfig, now| {
            config.set_role(&member, role, now);
            config.set_role_status(&member, status, now);
        },
    )
    .await
}
