//! Group lifecycle operations.
//!
//! A group is itself an account: its id derives from a generated identity,
//! and its swarm stores the group's config namespaces and sealed messages.
//! Admins hold the group identity seed; encryption uses a separate X25519
//! keypair that rotates when membership shrinks.
//!
//! Key rotation is distribute-then-commit: the new key is sealed to every
//! remaining member and all sends must land before anything is persisted
//! locally. A rotation that fails midway leaves the old key in place, so
//! the group never splits between members that can and cannot read it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tracing::{info, warn};
use x25519_dalek::{PublicKey, StaticSecret};

use umbra_config::{GroupKeysConfig, GroupMembersConfig, UserGroupsConfig};
use umbra_shared::protocol::{Content, GroupKeyUpdate, GroupMemberLeft};
use umbra_shared::{envelope, AccountId, ConfigNamespace, GroupRole, GroupRoleStatus, Identity};
use umbra_store::{Group, GroupKeyPair, GroupMember, Thread, ThreadKind};

use crate::context::{now_ms, ClientContext};
use crate::error::{to_bytes, ClientError, Result};
use crate::events::ClientEvent;
use crate::jobs::{
    GroupInviteDetails, GroupPromoteDetails, JobRunner, JobSpec, ConfigSyncDetails,
    CONFIG_SYNC_MAX_FAILURES, GROUP_OP_MAX_FAILURES, VARIANT_CONFIG_SYNC, VARIANT_GROUP_INVITE,
    VARIANT_GROUP_PROMOTE,
};
use crate::sync::{purge_group_local, SyncEngine};

pub struct GroupManager {
    ctx: Arc<ClientContext>,
    sync: Arc<SyncEngine>,
    jobs: Arc<JobRunner>,
    /// Groups with a rotation currently distributing.
    rotations: Mutex<HashSet<AccountId>>,
}

impl GroupManager {
    pub fn new(ctx: Arc<ClientContext>, sync: Arc<SyncEngine>, jobs: Arc<JobRunner>) -> Self {
        Self {
            ctx,
            sync,
            jobs,
            rotations: Mutex::new(HashSet::new()),
        }
    }

    /// Create a group, persist it locally, and queue invites for the
    /// initial members. Returns the new group's account id.
    pub async fn create_group(&self, name: String, members: Vec<AccountId>) -> Result<AccountId> {
        let group_identity = Identity::generate();
        let group = group_identity.account_id();
        let own_id = self.ctx.account_id();

        let encryption_secret = StaticSecret::random_from_rng(OsRng);
        let encryption_public = PublicKey::from(&encryption_secret).to_bytes();
        let encryption_secret = encryption_secret.to_bytes();

        info!(group = %group.short(), members = members.len(), "Creating group");
        {
            let db = self.ctx.db();
            db.upsert_group(&Group {
                id: group,
                name: name.clone(),
                identity_seed: Some(*group_identity.seed()),
                created_at: Utc::now(),
            })?;
            db.upsert_group_member(&GroupMember {
                group_id: group,
                member_id: own_id,
                role: GroupRole::Admin,
                role_status: GroupRoleStatus::Accepted,
                added_at: Utc::now(),
            })?;
            for member in &members {
                db.upsert_group_member(&GroupMember {
                    group_id: group,
                    member_id: *member,
                    role: GroupRole::Standard,
                    role_status: GroupRoleStatus::Pending,
                    added_at: Utc::now(),
                })?;
            }
            db.insert_group_key_pair(&GroupKeyPair {
                group_id: group,
                public_key: encryption_public,
                secret_key: encryption_secret,
                received_at: Utc::now(),
            })?;
            db.upsert_thread(&Thread {
                id: group.to_hex(),
                kind: ThreadKind::Group,
                priority: 0,
                created_at: Utc::now(),
            })?;
        }
        self.ctx.emit(ClientEvent::ThreadCreated {
            thread_id: group.to_hex(),
        });

        // Seed the group's config namespaces so they push to its swarm.
        let group_name = name.clone();
        self.sync
            .update(
                &group,
                || umbra_config::GroupInfoConfig::new(String::new(), 0),
                |config: &mut umbra_config::GroupInfoConfig, now| {
                    config.set_name(group_name, now);
                },
            )
            .await?;
        let initial = members.clone();
        self.sync
            .update(
                &group,
                GroupMembersConfig::new,
                |config: &mut GroupMembersConfig, now| {
                    config.add(own_id, GroupRole::Admin, GroupRoleStatus::Accepted, now);
                    for member in &initial {
                        config.add(*member, GroupRole::Standard, GroupRoleStatus::Pending, now);
                    }
                },
            )
            .await?;
        self.sync
            .update(&group, GroupKeysConfig::new, |config: &mut GroupKeysConfig, now| {
                config.add_key(encryption_public, encryption_secret, now);
            })
            .await?;
        self.sync
            .update(&own_id, UserGroupsConfig::new, |config: &mut UserGroupsConfig, now| {
                config.add_group(group, name, now);
            })
            .await?;

        self.submit_config_sync(group, ConfigNamespace::GroupInfo)?;
        self.submit_config_sync(group, ConfigNamespace::GroupMembers)?;
        self.submit_config_sync(group, ConfigNamespace::GroupKeys)?;
        self.submit_config_sync(own_id, ConfigNamespace::UserGroups)?;

        for member in &members {
            self.submit_invite(group, *member)?;
        }

        self.ctx.notifier().subscribe_push(&group);
        self.ctx.emit(ClientEvent::GroupUpdated { group });
        Ok(group)
    }

    /// Add a member to an existing group and queue their invite.
    pub async fn invite_member(&self, group: AccountId, member: AccountId) -> Result<()> {
        self.require_admin(&group)?;

        self.ctx.db().upsert_group_member(&GroupMember {
            group_id: group,
            member_id: member,
            role: GroupRole::Standard,
            role_status: GroupRoleStatus::Pending,
            added_at: Utc::now(),
        })?;
        self.sync
            .update(
                &group,
                GroupMembersConfig::new,
                |config: &mut GroupMembersConfig, now| {
                    config.add(member, GroupRole::Standard, GroupRoleStatus::Pending, now);
                },
            )
            .await?;

        self.submit_config_sync(group, ConfigNamespace::GroupMembers)?;
        self.submit_invite(group, member)?;
        self.ctx.emit(ClientEvent::GroupUpdated { group });
        Ok(())
    }

    /// Queue an admin promotion. Requires holding the group identity seed.
    pub async fn promote_member(&self, group: AccountId, member: AccountId) -> Result<()> {
        {
            let db = self.ctx.db();
            if db.get_group(&group)?.identity_seed.is_none() {
                return Err(ClientError::NotAdmin(group));
            }
            db.get_group_member(&group, &member)?;
        }

        self.jobs.submit(JobSpec {
            variant: VARIANT_GROUP_PROMOTE,
            thread_id: Some(group.to_hex()),
            details: to_bytes(&GroupPromoteDetails { group, member })?,
            max_failure_count: GROUP_OP_MAX_FAILURES,
            uniqueness_key: Some(format!(
                "group_promote:{}:{}",
                group.to_hex(),
                member.to_hex()
            )),
        })?;
        Ok(())
    }

    /// Remove a member and rotate the group key so the removed device
    /// cannot read anything sent afterwards.
    pub async fn remove_member(&self, group: AccountId, member: AccountId) -> Result<()> {
        self.require_admin(&group)?;
        self.begin_rotation(group).await?;
        let result = self.remove_and_rotate(group, &[member]).await;
        self.end_rotation(group).await;
        result
    }

    /// Drop every zombie member and rotate once for the whole batch.
    pub async fn purge_zombies(&self, group: AccountId) -> Result<()> {
        self.require_admin(&group)?;
        let zombies: Vec<AccountId> = self
            .ctx
            .db()
            .list_group_members(&group)?
            .into_iter()
            .filter(|m| m.role == GroupRole::Zombie)
            .map(|m| m.member_id)
            .collect();
        if zombies.is_empty() {
            return Ok(());
        }

        self.begin_rotation(group).await?;
        let result = self.remove_and_rotate(group, &zombies).await;
        self.end_rotation(group).await;
        result
    }

    /// Leave a group: announce the departure into the group swarm, mark
    /// ourselves zombie in the shared roster, then purge local state.
    pub async fn leave_group(&self, group: AccountId) -> Result<()> {
        let own_id = self.ctx.account_id();
        let public_key = self
            .ctx
            .db()
            .current_group_key_pair(&group)?
            .map(|pair| pair.public_key)
            .ok_or(ClientError::NoGroupKey(group))?;

        let content = Content::GroupMemberLeft(GroupMemberLeft { group }).to_bytes()?;
        let sealed = envelope::seal(&content, self.ctx.identity(), &public_key)?;
        self.ctx
            .snode()
            .store(
                None,
                &group,
                ConfigNamespace::GroupMessages,
                &sealed,
                self.ctx.config().message_ttl_ms,
                now_ms(),
            )
            .await?;

        self.sync
            .update(
                &group,
                GroupMembersConfig::new,
                |config: &mut GroupMembersConfig, now| {
                    config.mark_zombie(&own_id, now);
                },
            )
            .await?;
        // Best effort: the roster update helps remaining members, but our
        // departure must not hinge on it.
        if let Err(e) = self
            .sync
            .push_pending(&group, ConfigNamespace::GroupMembers)
            .await
        {
            warn!(group = %group.short(), error = %e, "Roster push on leave failed");
        }

        self.sync
            .update(&own_id, UserGroupsConfig::new, |config: &mut UserGroupsConfig, _| {
                config.remove_group(&group);
            })
            .await?;
        self.submit_config_sync(own_id, ConfigNamespace::UserGroups)?;

        let db = self.ctx.db();
        purge_group_local(&self.ctx, &db, &group)?;
        info!(group = %group.short(), "Left group");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rotation
    // -----------------------------------------------------------------------

    async fn remove_and_rotate(&self, group: AccountId, removed: &[AccountId]) -> Result<()> {
        let own_id = self.ctx.account_id();
        let secret = StaticSecret::random_from_rng(OsRng);
        let public_key = PublicKey::from(&secret).to_bytes();
        let secret_key = secret.to_bytes();
        let rotated_at_ms = now_ms();

        let recipients: Vec<AccountId> = self
            .ctx
            .db()
            .list_group_members(&group)?
            .into_iter()
            .filter(|m| {
                m.role != GroupRole::Zombie
                    && m.member_id != own_id
                    && !removed.contains(&m.member_id)
            })
            .map(|m| m.member_id)
            .collect();

        let update = Content::GroupKeyUpdate(GroupKeyUpdate {
            group,
            public_key,
            secret_key,
            rotated_at_ms,
        })
        .to_bytes()?;

        // Every remaining member must receive the key before it becomes
        // current; a partial distribution aborts without persisting.
        for recipient in &recipients {
            let sealed = envelope::seal(&update, self.ctx.identity(), &recipient.key)?;
            self.ctx
                .snode()
                .store(
                    None,
                    recipient,
                    ConfigNamespace::Default,
                    &sealed,
                    self.ctx.config().message_ttl_ms,
                    now_ms(),
                )
                .await?;
        }

        {
            let db = self.ctx.db();
            for member in removed {
                db.delete_group_member(&group, member)?;
            }
            db.insert_group_key_pair(&GroupKeyPair {
                group_id: group,
                public_key,
                secret_key,
                received_at: Utc::now(),
            })?;
        }
        self.sync
            .update(
                &group,
                GroupMembersConfig::new,
                |config: &mut GroupMembersConfig, _| {
                    for member in removed {
                        config.remove(member);
                    }
                },
            )
            .await?;
        self.sync
            .update(&group, GroupKeysConfig::new, |config: &mut GroupKeysConfig, _| {
                config.add_key(public_key, secret_key, rotated_at_ms);
            })
            .await?;

        self.submit_config_sync(group, ConfigNamespace::GroupMembers)?;
        self.submit_config_sync(group, ConfigNamespace::GroupKeys)?;

        info!(
            group = %group.short(),
            removed = removed.len(),
            recipients = recipients.len(),
            "Rotated group key"
        );
        self.ctx.emit(ClientEvent::GroupKeyRotated { group });
        self.ctx.emit(ClientEvent::GroupUpdated { group });
        Ok(())
    }

    async fn begin_rotation(&self, group: AccountId) -> Result<()> {
        if !self.rotations.lock().await.insert(group) {
            return Err(ClientError::RotationInProgress(group));
        }
        Ok(())
    }

    async fn end_rotation(&self, group: AccountId) {
        self.rotations.lock().await.remove(&group);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require_admin(&self, group: &AccountId) -> Result<()> {
        let own_id = self.ctx.account_id();
        match self.ctx.db().get_group_member(group, &own_id) {
            Ok(row) if row.role == GroupRole::Admin => Ok(()),
            _ => Err(ClientError::NotAdmin(*group)),
        }
    }

    fn submit_invite(&self, group: AccountId, member: AccountId) -> Result<()> {
        self.jobs.submit(JobSpec {
            variant: VARIANT_GROUP_INVITE,
            thread_id: Some(group.to_hex()),
            details: to_bytes(&GroupInviteDetails { group, member })?,
            max_failure_count: GROUP_OP_MAX_FAILURES,
            uniqueness_key: Some(format!(
                "group_invite:{}:{}",
                group.to_hex(),
                member.to_hex()
            )),
        })?;
        Ok(())
    }

    fn submit_config_sync(&self, owner: AccountId, namespace: ConfigNamespace) -> Result<()> {
        self.jobs.submit(JobSpec {
            variant: VARIANT_CONFIG_SYNC,
            thread_id: None,
            details: to_bytes(&ConfigSyncDetails { owner, namespace })?,
            max_failure_count: CONFIG_SYNC_MAX_FAILURES,
            uniqueness_key: Some(format!(
                "config_sync:{}:{}",
                owner.to_hex(),
                namespace.value()
            )),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{context, context_with_notifier};
    use crate::events::testing::RecordingNotifier;

    fn manager(ctx: &Arc<ClientContext>) -> GroupManager {
        let sync = SyncEngine::new(ctx.clone());
        let jobs = JobRunner::new(ctx.clone());
        GroupManager::new(ctx.clone(), sync, jobs)
    }

    fn member_id() -> AccountId {
        Identity::generate().account_id()
    }

    #[tokio::test]
    async fn create_group_persists_rows_and_queues_work() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (ctx, _) = context_with_notifier(notifier.clone());
        let manager = manager(&ctx);
        let members = vec![member_id(), member_id()];

        let group = manager
            .create_group("book club".to_string(), members.clone())
            .await
            .unwrap();

        let db = ctx.db();
        let row = db.get_group(&group).unwrap();
        assert_eq!(row.name, "book club");
        assert!(row.identity_seed.is_some());
        assert!(db.thread_exists(&group.to_hex()).unwrap());
        assert_eq!(db.list_group_members(&group).unwrap().len(), 3);
        assert!(db.current_group_key_pair(&group).unwrap().is_some());

        let jobs = db.list_jobs().unwrap();
        let invites = jobs
            .iter()
            .filter(|j| j.variant == VARIANT_GROUP_INVITE)
            .count();
        let pushes = jobs
            .iter()
            .filter(|j| j.variant == VARIANT_CONFIG_SYNC)
            .count();
        assert_eq!(invites, 2);
        assert_eq!(pushes, 4);

        assert_eq!(
            notifier.push_subscriptions.lock().unwrap().as_slice(),
            &[group]
        );
    }

    #[tokio::test]
    async fn non_admin_cannot_invite_or_remove() {
        let (ctx, _) = context();
        let manager = manager(&ctx);
        let group = member_id();

        // No membership row at all.
        assert!(matches!(
            manager.invite_member(group, member_id()).await,
            Err(ClientError::NotAdmin(_))
        ));
        assert!(matches!(
            manager.remove_member(group, member_id()).await,
            Err(ClientError::NotAdmin(_))
        ));
    }

    async fn created_group(manager: &GroupManager, members: &[AccountId]) -> AccountId {
        manager
            .create_group("club".to_string(), members.to_vec())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn remove_member_rotates_only_after_distribution() {
        let (ctx, mock) = context();
        let manager = manager(&ctx);
        let (keep, drop) = (member_id(), member_id());
        let group = created_group(&manager, &[keep, drop]).await;

        // One remaining member gets the new key.
        mock.push_json(200, &serde_json::json!({ "hash": "h1" }));
        manager.remove_member(group, drop).await.unwrap();

        let db = ctx.db();
        assert!(db.get_group_member(&group, &drop).is_err());
        assert!(db.get_group_member(&group, &keep).is_ok());
        assert_eq!(db.list_group_key_pairs(&group).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_distribution_keeps_member_and_key() {
        let (ctx, mock) = context();
        let manager = manager(&ctx);
        let (keep, drop) = (member_id(), member_id());
        let group = created_group(&manager, &[keep, drop]).await;

        mock.push_response(500, b"storage failure".to_vec());
        assert!(manager.remove_member(group, drop).await.is_err());

        let db = ctx.db();
        assert!(db.get_group_member(&group, &drop).is_ok());
        assert_eq!(db.list_group_key_pairs(&group).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rotation_guard_clears_after_a_failed_attempt() {
        let (ctx, mock) = context();
        let manager = manager(&ctx);
        let (keep, drop) = (member_id(), member_id());
        let group = created_group(&manager, &[keep, drop]).await;

        mock.push_response(500, b"storage failure".to_vec());
        assert!(manager.remove_member(group, drop).await.is_err());

        // Guard released: the retry reaches the network again, it is not
        // rejected as an in-flight rotation.
        mock.push_json(200, &serde_json::json!({ "hash": "h1" }));
        manager.remove_member(group, drop).await.unwrap();
        assert!(ctx.db().get_group_member(&group, &drop).is_err());
    }

    #[tokio::test]
    async fn leave_group_announces_and_purges() {
        let (ctx, mock) = context();
        let manager = manager(&ctx);
        let group = created_group(&manager, &[member_id()]).await;

        // Leave message into the group swarm, then the roster push.
        mock.push_json(200, &serde_json::json!({ "hash": "h1" }));
        mock.push_json(200, &serde_json::json!({ "hash": "h2" }));
        manager.leave_group(group).await.unwrap();

        let db = ctx.db();
        assert!(db.get_group(&group).is_err());
        assert!(!db.thread_exists(&group.to_hex()).unwrap());
        assert!(db.list_group_key_pairs(&group).unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_zombies_batches_one_rotation() {
        let (ctx, mock) = context();
        let manager = manager(&ctx);
        let (keep, z1, z2) = (member_id(), member_id(), member_id());
        let group = created_group(&manager, &[keep, z1, z2]).await;
        {
            let db = ctx.db();
            db.set_group_member_role(&group, &z1, GroupRole::Zombie)
                .unwrap();
            db.set_group_member_role(&group, &z2, GroupRole::Zombie)
                .unwrap();
        }

        mock.push_json(200, &serde_json::json!({ "hash": "h1" }));
        manager.purge_zombies(group).await.unwrap();

        let db = ctx.db();
        assert!(db.get_group_member(&group, &z1).is_err());
        assert!(db.get_group_member(&group, &z2).is_err());
        assert!(db.get_group_member(&group, &keep).is_ok());
        // One batch, one new key.
        assert_eq!(db.list_group_key_pairs(&group).unwrap().len(), 2);
    }
}
