//! Executor that delivers a group invite to one member.
//!
//! The invite is rebuilt from the store at execution time, so a retry after
//! a roster change or key rotation carries current material. Terminal
//! failure flips the member's role status to `Failed` and records it with
//! the failure debouncer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use umbra_shared::protocol::{Content, GroupInvite};
use umbra_shared::{envelope, AccountId, ConfigNamespace, GroupRole, GroupRoleStatus};
use umbra_store::Job;

use crate::context::{now_ms, ClientContext};
use crate::error::{from_bytes, ClientError, Result};
use crate::groups::debounce::FailureDebouncer;
use crate::jobs::{GroupInviteDetails, JobExecutor, JobOutcome, VARIANT_GROUP_INVITE};
use crate::sync::SyncEngine;

pub struct GroupInviteExecutor {
    ctx: Arc<ClientContext>,
    sync: Arc<SyncEngine>,
    debouncer: Arc<FailureDebouncer>,
}

impl GroupInviteExecutor {
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

    fn build_invite(&self, group: &AccountId) -> Result<GroupInvite> {
        let db = self.ctx.db();
        let row = db.get_group(group)?;
        let pair = db
            .current_group_key_pair(group)?
            .ok_or(ClientError::NoGroupKey(*group))?;

        let mut members = Vec::new();
        let mut admins = Vec::new();
        for member in db.list_group_members(group)? {
            match member.role {
                GroupRole::Admin => admins.push(member.member_id),
                GroupRole::Standard => members.push(member.member_id),
                GroupRole::Zombie => {}
            }
        }

        Ok(GroupInvite {
            group: *group,
            name: row.name,
            encryption_public: pair.public_key,
            encryption_secret: pair.secret_key,
            members,
            admins,
            invited_at_ms: now_ms(),
        })
    }

    async fn mark_status(
        &self,
        group: AccountId,
        member: AccountId,
        status: GroupRoleStatus,
    ) -> Result<()> {
        self.ctx
            .db()
            .set_group_member_status(&group, &member, status)?;
        self.sync
            .update(
                &group,
                umbra_config::GroupMembersConfig::new,
                |config: &mut umbra_config::GroupMembersConfig, now| {
                    config.set_role_status(&member, status, now);
                },
            )
            .await
    }
}

#[async_trait]
impl JobExecutor for GroupInviteExecutor {
    fn variant(&self) -> &'static str {
        VARIANT_GROUP_INVITE
    }

    async fn run(&self, job: &Job) -> Result<JobOutcome> {
        let details: GroupInviteDetails = from_bytes(&job.details)?;
        let invite = self.build_invite(&details.group)?;

        let content = Content::GroupInvite(invite).to_bytes()?;
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

        self.mark_status(details.group, details.member, GroupRoleStatus::Accepted)
            .await?;
        debug!(group = %details.group.short(), member = %details.member.short(), "Invite delivered");
        Ok(JobOutcome::Success)
    }

    async fn on_permanent_failure(&self, job: &Job) -> Result<()> {
        let details: GroupInviteDetails = from_bytes(&job.details)?;
        self.mark_status(details.group, details.member, GroupRoleStatus::Failed)
            .await?;
        self.debouncer.record(details.group, details.member);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context_with_notifier;
    use crate::error::to_bytes;
    use crate::events::testing::RecordingNotifier;
    use chrono::Utc;
    use std::time::Duration;
    use umbra_shared::Identity;
    use umbra_store::{Group, GroupKeyPair, GroupMember};
    use uuid::Uuid;

    fn seed_group(ctx: &ClientContext, group: AccountId, member: AccountId) {
        let db = ctx.db();
        db.upsert_group(&Group {
            id: group,
            name: "club".to_string(),
            identity_seed: Some([9; 32]),
            created_at: Utc::now(),
        })
        .unwrap();
        db.upsert_group_member(&GroupMember {
            group_id: group,
            member_id: ctx.account_id(),
            role: GroupRole::Admin,
            role_status: GroupRoleStatus::Accepted,
            added_at: Utc::now(),
        })
        .unwrap();
        db.upsert_group_member(&GroupMember {
            group_id: group,
            member_id: member,
            role: GroupRole::Standard,
            role_status: GroupRoleStatus::Pending,
            added_at: Utc::now(),
        })
        .unwrap();
        db.insert_group_key_pair(&GroupKeyPair {
            group_id: group,
            public_key: [1; 32],
            secret_key: [2; 32],
            received_at: Utc::now(),
        })
        .unwrap();
    }

    fn invite_job(group: AccountId, member: AccountId) -> Job {
        Job {
            id: Uuid::new_v4(),
            variant: VARIANT_GROUP_INVITE.to_string(),
            thread_id: Some(group.to_hex()),
            details: to_bytes(&GroupInviteDetails { group, member }).unwrap(),
            failure_count: 0,
            max_failure_count: 1,
            uniqueness_key: None,
            next_attempt_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivered_invite_flips_status_to_accepted() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (ctx, mock) = context_with_notifier(notifier.clone());
        let sync = SyncEngine::new(ctx.clone());
        let debouncer = FailureDebouncer::new(Duration::from_millis(10), notifier);
        let executor = GroupInviteExecutor::new(ctx.clone(), sync, debouncer);

        let group = Identity::generate().account_id();
        let member = Identity::generate().account_id();
        seed_group(&ctx, group, member);

        mock.push_json(200, &serde_json::json!({ "hash": "h1" }));
        let outcome = executor.run(&invite_job(group, member)).await.unwrap();
        assert_eq!(outcome, JobOutcome::Success);

        let row = ctx.db().get_group_member(&group, &member).unwrap();
        assert_eq!(row.role_status, GroupRoleStatus::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_marks_member_and_debounces() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (ctx, _) = context_with_notifier(notifier.clone());
        let sync = SyncEngine::new(ctx.clone());
        let debouncer = FailureDebouncer::new(Duration::from_millis(1_500), notifier.clone());
        let executor = GroupInviteExecutor::new(ctx.clone(), sync, debouncer);

        let group = Identity::generate().account_id();
        let member = Identity::generate().account_id();
        seed_group(&ctx, group, member);

        executor
            .on_permanent_failure(&invite_job(group, member))
            .await
            .unwrap();

        let row = ctx.db().get_group_member(&group, &member).unwrap();
        assert_eq!(row.role_status, GroupRoleStatus::Failed);

        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1_600)).await;
        tokio::task::yield_now().await;
        assert_eq!(notifier.notifications.lock().unwrap().len(), 1);
    }
}
