//! Incoming message pipeline.
//!
//! One entry point per transport: direct swarm envelopes, group swarm
//! envelopes, community room posts, and community inbox messages. Each
//! unseals and authenticates its input, then hands the decoded [`Content`]
//! to a common dispatcher that writes rows, updates config objects, and
//! emits events. Malformed or unverifiable input is dropped, never fatal:
//! one bad message must not stall the poll loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use umbra_config::{GroupKeysConfig, GroupMembersConfig, UserGroupsConfig};
use umbra_net::{InboxMessage, RoomMessage};
use umbra_shared::blinding::{self, BlindedKeyPair};
use umbra_shared::protocol::{Content, VisibleMessage};
use umbra_shared::{envelope, AccountId, ConfigNamespace, GroupRole, GroupRoleStatus};
use umbra_store::{
    Community, Group, GroupKeyPair, GroupMember, Message, MessageStatus, Thread, ThreadKind,
};

use crate::context::{now_ms, ClientContext};
use crate::error::{to_bytes, Result};
use crate::events::ClientEvent;
use crate::jobs::{
    ConfigSyncDetails, JobRunner, JobSpec, CONFIG_SYNC_MAX_FAILURES, VARIANT_CONFIG_SYNC,
};
use crate::sync::SyncEngine;

/// What handling one wire message did.
#[derive(Debug, PartialEq, Eq)]
pub enum ProcessedMessage {
    /// A chat message landed in a thread.
    Message {
        thread_id: String,
        message_id: uuid::Uuid,
    },
    /// A control message was applied (invite, rotation, receipt, ...).
    Control,
    /// Duplicate, undecryptable, or otherwise ignored.
    Dropped,
}

pub struct ReceivePipeline {
    ctx: Arc<ClientContext>,
    sync: Arc<SyncEngine>,
    jobs: Arc<JobRunner>,
}

impl ReceivePipeline {
    pub fn new(ctx: Arc<ClientContext>, sync: Arc<SyncEngine>, jobs: Arc<JobRunner>) -> Self {
        Self { ctx, sync, jobs }
    }

    /// Handle a sealed envelope from the user's own swarm.
    pub async fn handle_direct(&self, data: &[u8]) -> Result<ProcessedMessage> {
        let opened = match envelope::open(data, &self.ctx.identity().x25519_secret_bytes()) {
            Ok(opened) => opened,
            Err(e) => {
                debug!(error = %e, "Dropping direct envelope that does not open");
                return Ok(ProcessedMessage::Dropped);
            }
        };
        let content = match Content::from_bytes(&opened.plaintext) {
            Ok(content) => content,
            Err(e) => {
                warn!(sender = %opened.sender.short(), error = %e, "Dropping undecodable payload");
                return Ok(ProcessedMessage::Dropped);
            }
        };
        self.dispatch(
            opened.sender,
            opened.sender.to_hex(),
            ThreadKind::Direct,
            content,
        )
        .await
    }

    /// Handle a sealed envelope from a group's swarm. The envelope is
    /// trial-opened against every retained group key, newest first, so
    /// messages sealed just before a rotation still land.
    pub async fn handle_group(&self, group: &AccountId, data: &[u8]) -> Result<ProcessedMessage> {
        let mut pairs = self.ctx.db().list_group_key_pairs(group)?;
        pairs.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        if pairs.is_empty() {
            debug!(group = %group.short(), "Dropping group envelope, no keys retained");
            return Ok(ProcessedMessage::Dropped);
        }

        let opened = pairs
            .iter()
            .find_map(|pair| envelope::open(data, &pair.secret_key).ok());
        let Some(opened) = opened else {
            debug!(group = %group.short(), "Dropping group envelope no retained key opens");
            return Ok(ProcessedMessage::Dropped);
        };

        let content = match Content::from_bytes(&opened.plaintext) {
            Ok(content) => content,
            Err(e) => {
                warn!(group = %group.short(), error = %e, "Dropping undecodable group payload");
                return Ok(ProcessedMessage::Dropped);
            }
        };
        self.dispatch(opened.sender, group.to_hex(), ThreadKind::Group, content)
            .await
    }

    /// Handle a public room post. The post is authenticated by the poster's
    /// blinded signature; unsigned or forged posts are dropped.
    pub async fn handle_room_message(
        &self,
        community: &Community,
        message: &RoomMessage,
    ) -> Result<ProcessedMessage> {
        let Ok(poster) = AccountId::from_hex(&message.poster) else {
            debug!(poster = %message.poster, "Dropping room post with malformed poster id");
            return Ok(ProcessedMessage::Dropped);
        };

        // Our own posts come back on the next poll; the local row already
        // exists as outgoing.
        let own = BlindedKeyPair::derive(self.ctx.identity(), &community.server_pubkey);
        if poster == own.account_id() {
            return Ok(ProcessedMessage::Dropped);
        }

        let data = message.data_bytes()?;
        let signature = message.signature_bytes()?;
        if blinding::verify_blinded(&poster.key, &data, &signature).is_err() {
            warn!(poster = %poster.short(), room = %community.room, "Dropping room post with bad signature");
            return Ok(ProcessedMessage::Dropped);
        }

        let content = match Content::from_bytes(&data) {
            Ok(content) => content,
            Err(_) => return Ok(ProcessedMessage::Dropped),
        };
        self.dispatch(
            poster,
            community.key.clone(),
            ThreadKind::Community,
            content,
        )
        .await
    }

    /// Handle a sealed direct message relayed through a community server.
    /// The resulting thread is keyed by the sender's blinded id.
    pub async fn handle_inbox_message(
        &self,
        keys: &BlindedKeyPair,
        message: &InboxMessage,
    ) -> Result<ProcessedMessage> {
        let Ok(sender) = AccountId::from_hex(&message.sender) else {
            debug!(sender = %message.sender, "Dropping inbox message with malformed sender id");
            return Ok(ProcessedMessage::Dropped);
        };

        let data = message.data_bytes()?;
        let plaintext = match blinding::open_from_blinded(&data, keys, &sender.key) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                debug!(sender = %sender.short(), error = %e, "Dropping inbox message that does not open");
                return Ok(ProcessedMessage::Dropped);
            }
        };

        let content = match Content::from_bytes(&plaintext) {
            Ok(content) => content,
            Err(_) => return Ok(ProcessedMessage::Dropped),
        };
        self.dispatch(sender, sender.to_hex(), ThreadKind::Direct, content)
            .await
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    async fn dispatch(
        &self,
        sender: AccountId,
        thread_id: String,
        kind: ThreadKind,
        content: Content,
    ) -> Result<ProcessedMessage> {
        match content {
            Content::Visible(message) => self.apply_visible(sender, thread_id, kind, message),
            Content::GroupInvite(invite) => self.apply_invite(sender, invite).await,
            Content::GroupPromote(promote) => self.apply_promote(promote).await,
            Content::GroupKeyUpdate(update) => self.apply_key_update(update).await,
            Content::GroupMemberLeft(left) => self.apply_member_left(sender, left.group).await,
            Content::ReadReceipt(receipt) => {
                self.ctx.emit(ClientEvent::ReadReceipts {
                    thread_id,
                    timestamps: receipt.timestamps,
                });
                Ok(ProcessedMessage::Control)
            }
        }
    }

    fn apply_visible(
        &self,
        sender: AccountId,
        thread_id: String,
        kind: ThreadKind,
        message: VisibleMessage,
    ) -> Result<ProcessedMessage> {
        let db = self.ctx.db();

        // The message id travels with the content, so a payload replayed
        // into several namespaces still lands once.
        if db.get_message(message.message_id).is_ok() {
            return Ok(ProcessedMessage::Dropped);
        }

        if !db.thread_exists(&thread_id)? {
            db.upsert_thread(&Thread {
                id: thread_id.clone(),
                kind,
                priority: 0,
                created_at: Utc::now(),
            })?;
            self.ctx.emit(ClientEvent::ThreadCreated {
                thread_id: thread_id.clone(),
            });
        }

        db.insert_message(&Message {
            id: message.message_id,
            thread_id: thread_id.clone(),
            sender,
            body: message.body,
            sent_at: ms_to_utc(message.sent_at_ms),
            received_at: Utc::now(),
            is_outgoing: false,
            status: MessageStatus::Received,
        })?;

        // Senders piggyback their profile; refresh the row of a known
        // contact. Strangers are not added implicitly.
        if let Some(profile) = message.profile {
            if sender.is_standard() {
                if let Ok(mut contact) = db.get_contact(&sender) {
                    contact.name = profile.name;
                    contact.picture_url = profile.picture_url;
                    contact.picture_key = profile.picture_key;
                    db.upsert_contact(&contact)?;
                    self.ctx.emit(ClientEvent::ContactsUpdated {
                        changed: vec![sender],
                        removed: Vec::new(),
                    });
                }
            }
        }

        self.ctx.emit(ClientEvent::MessageReceived {
            thread_id: thread_id.clone(),
            message_id: message.message_id,
            sender,
        });
        Ok(ProcessedMessage::Message {
            thread_id,
            message_id: message.message_id,
        })
    }

    async fn apply_invite(
        &self,
        sender: AccountId,
        invite: umbra_shared::protocol::GroupInvite,
    ) -> Result<ProcessedMessage> {
        let group = invite.group;
        let own_id = self.ctx.account_id();
        debug!(group = %group.short(), sender = %sender.short(), "Applying group invite");

        {
            let db = self.ctx.db();
            db.upsert_group(&Group {
                id: group,
                name: invite.name.clone(),
                identity_seed: None,
                created_at: ms_to_utc(invite.invited_at_ms),
            })?;

            for member in invite.members.iter().chain(invite.admins.iter()) {
                let role = if invite.admins.contains(member) {
                    GroupRole::Admin
                } else {
                    GroupRole::Standard
                };
                db.upsert_group_member(&GroupMember {
                    group_id: group,
                    member_id: *member,
                    role,
                    role_status: GroupRoleStatus::Accepted,
                    added_at: ms_to_utc(invite.invited_at_ms),
                })?;
            }

            db.insert_group_key_pair(&GroupKeyPair {
                group_id: group,
                public_key: invite.encryption_public,
                secret_key: invite.encryption_secret,
                received_at: Utc::now(),
            })?;

            let thread_id = group.to_hex();
            if !db.thread_exists(&thread_id)? {
                db.upsert_thread(&Thread {
                    id: thread_id.clone(),
                    kind: ThreadKind::Group,
                    priority: 0,
                    created_at: Utc::now(),
                })?;
                self.ctx.emit(ClientEvent::ThreadCreated { thread_id });
            }
        }

        // Mirror the rows into the synced config objects so other devices
        // of this account converge.
        let invite_members = invite.members.clone();
        let invite_admins = invite.admins.clone();
        self.sync
            .update(&group, GroupKeysConfig::new, |config: &mut GroupKeysConfig, now| {
                config.add_key(invite.encryption_public, invite.encryption_secret, now);
            })
            .await?;
        self.sync
            .update(
                &group,
                GroupMembersConfig::new,
                |config: &mut GroupMembersConfig, now| {
                    for member in invite_members.iter().chain(invite_admins.iter()) {
                        let role = if invite_admins.contains(member) {
                            GroupRole::Admin
                        } else {
                            GroupRole::Standard
                        };
                        config.add(*member, role, GroupRoleStatus::Accepted, now);
                    }
                },
            )
            .await?;
        let name = invite.name.clone();
        self.sync
            .update(&own_id, UserGroupsConfig::new, |config: &mut UserGroupsConfig, now| {
                config.add_group(group, name, now);
            })
            .await?;

        self.submit_config_sync(group, ConfigNamespace::GroupMembers)?;
        self.submit_config_sync(group, ConfigNamespace::GroupKeys)?;
        self.submit_config_sync(own_id, ConfigNamespace::UserGroups)?;

        self.ctx.notifier().subscribe_push(&group);
        self.ctx.emit(ClientEvent::GroupUpdated { group });
        Ok(ProcessedMessage::Control)
    }

    async fn apply_promote(
        &self,
        promote: umbra_shared::protocol::GroupPromote,
    ) -> Result<ProcessedMessage> {
        let group = promote.group;
        let own_id = self.ctx.account_id();
        {
            let db = self.ctx.db();
            if db.get_group(&group).is_err() {
                debug!(group = %group.short(), "Dropping promotion for unknown group");
                return Ok(ProcessedMessage::Dropped);
            }
            db.set_group_identity_seed(&group, &promote.identity_seed)?;
            db.set_group_member_role(&group, &own_id, GroupRole::Admin)?;
        }
        self.sync
            .update(
                &group,
                GroupMembersConfig::new,
                |config: &mut GroupMembersConfig, now| {
                    config.set_role(&own_id, GroupRole::Admin, now);
                },
            )
            .await?;

        self.ctx.emit(ClientEvent::GroupUpdated { group });
        Ok(ProcessedMessage::Control)
    }

    async fn apply_key_update(
        &self,
        update: umbra_shared::protocol::GroupKeyUpdate,
    ) -> Result<ProcessedMessage> {
        let group = update.group;
        {
            let db = self.ctx.db();
            if db.get_group(&group).is_err() {
                debug!(group = %group.short(), "Dropping key update for unknown group");
                return Ok(ProcessedMessage::Dropped);
            }
            db.insert_group_key_pair(&GroupKeyPair {
                group_id: group,
                public_key: update.public_key,
                secret_key: update.secret_key,
                received_at: Utc::now(),
            })?;
        }
        self.sync
            .update(&group, GroupKeysConfig::new, |config: &mut GroupKeysConfig, _| {
                config.add_key(update.public_key, update.secret_key, update.rotated_at_ms);
            })
            .await?;

        self.ctx.emit(ClientEvent::GroupKeyRotated { group });
        Ok(ProcessedMessage::Control)
    }

    async fn apply_member_left(
        &self,
        sender: AccountId,
        group: AccountId,
    ) -> Result<ProcessedMessage> {
        {
            let db = self.ctx.db();
            if db.get_group_member(&group, &sender).is_err() {
                return Ok(ProcessedMessage::Dropped);
            }
            db.set_group_member_role(&group, &sender, GroupRole::Zombie)?;
        }
        self.sync
            .update(
                &group,
                GroupMembersConfig::new,
                |config: &mut GroupMembersConfig, now| {
                    config.mark_zombie(&sender, now);
                },
            )
            .await?;

        self.ctx.emit(ClientEvent::GroupUpdated { group });
        Ok(ProcessedMessage::Control)
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

fn ms_to_utc(ms: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{context, context_with_notifier};
    use crate::events::testing::RecordingNotifier;
    use umbra_shared::protocol::{GroupInvite, GroupKeyUpdate, ReadReceipt};
    use umbra_shared::Identity;
    use uuid::Uuid;

    fn pipeline(ctx: &Arc<ClientContext>) -> ReceivePipeline {
        let sync = SyncEngine::new(ctx.clone());
        let jobs = JobRunner::new(ctx.clone());
        ReceivePipeline::new(ctx.clone(), sync, jobs)
    }

    fn visible(message_id: Uuid, body: &str) -> Content {
        Content::Visible(VisibleMessage {
            message_id,
            body: Some(body.to_string()),
            attachment_ids: Vec::new(),
            profile: None,
            sent_at_ms: 1_000,
        })
    }

    #[tokio::test]
    async fn direct_message_creates_thread_and_row() {
        let (ctx, _) = context();
        let pipeline = pipeline(&ctx);
        let sender = Identity::generate();
        let message_id = Uuid::new_v4();

        let sealed = envelope::seal(
            &visible(message_id, "hello").to_bytes().unwrap(),
            &sender,
            &ctx.identity().x25519_public_key(),
        )
        .unwrap();

        let processed = pipeline.handle_direct(&sealed).await.unwrap();
        assert_eq!(
            processed,
            ProcessedMessage::Message {
                thread_id: sender.account_id().to_hex(),
                message_id,
            }
        );

        let db = ctx.db();
        let row = db.get_message(message_id).unwrap();
        assert_eq!(row.body.as_deref(), Some("hello"));
        assert!(!row.is_outgoing);
        assert_eq!(row.sender, sender.account_id());
    }

    #[tokio::test]
    async fn duplicate_message_id_is_dropped() {
        let (ctx, _) = context();
        let pipeline = pipeline(&ctx);
        let sender = Identity::generate();
        let message_id = Uuid::new_v4();

        let sealed = envelope::seal(
            &visible(message_id, "once").to_bytes().unwrap(),
            &sender,
            &ctx.identity().x25519_public_key(),
        )
        .unwrap();

        assert!(matches!(
            pipeline.handle_direct(&sealed).await.unwrap(),
            ProcessedMessage::Message { .. }
        ));
        assert_eq!(
            pipeline.handle_direct(&sealed).await.unwrap(),
            ProcessedMessage::Dropped
        );
    }

    #[tokio::test]
    async fn envelope_to_someone_else_is_dropped() {
        let (ctx, _) = context();
        let pipeline = pipeline(&ctx);
        let sender = Identity::generate();
        let other = Identity::generate();

        let sealed = envelope::seal(
            &visible(Uuid::new_v4(), "not for us").to_bytes().unwrap(),
            &sender,
            &other.x25519_public_key(),
        )
        .unwrap();

        assert_eq!(
            pipeline.handle_direct(&sealed).await.unwrap(),
            ProcessedMessage::Dropped
        );
    }

    #[tokio::test]
    async fn group_message_opens_with_a_retained_key() {
        let (ctx, _) = context();
        let pipeline = pipeline(&ctx);
        let group = Identity::generate().account_id();
        let group_identity = Identity::generate();
        let sender = Identity::generate();

        ctx.db()
            .upsert_group(&Group {
                id: group,
                name: "club".to_string(),
                identity_seed: None,
                created_at: Utc::now(),
            })
            .unwrap();
        ctx.db()
            .insert_group_key_pair(&GroupKeyPair {
                group_id: group,
                public_key: group_identity.x25519_public_key(),
                secret_key: group_identity.x25519_secret_bytes(),
                received_at: Utc::now(),
            })
            .unwrap();

        let message_id = Uuid::new_v4();
        let sealed = envelope::seal(
            &visible(message_id, "group hello").to_bytes().unwrap(),
            &sender,
            &group_identity.x25519_public_key(),
        )
        .unwrap();

        let processed = pipeline.handle_group(&group, &sealed).await.unwrap();
        assert_eq!(
            processed,
            ProcessedMessage::Message {
                thread_id: group.to_hex(),
                message_id,
            }
        );
    }

    #[tokio::test]
    async fn group_message_without_keys_is_dropped() {
        let (ctx, _) = context();
        let pipeline = pipeline(&ctx);
        let group = Identity::generate().account_id();

        assert_eq!(
            pipeline.handle_group(&group, b"whatever").await.unwrap(),
            ProcessedMessage::Dropped
        );
    }

    #[tokio::test]
    async fn invite_persists_group_and_queues_config_pushes() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (ctx, _) = context_with_notifier(notifier.clone());
        let pipeline = pipeline(&ctx);
        let inviter = Identity::generate();
        let group = Identity::generate().account_id();

        let invite = Content::GroupInvite(GroupInvite {
            group,
            name: "book club".to_string(),
            encryption_public: [7; 32],
            encryption_secret: [8; 32],
            members: vec![ctx.account_id()],
            admins: vec![inviter.account_id()],
            invited_at_ms: 1_000,
        });
        let sealed = envelope::seal(
            &invite.to_bytes().unwrap(),
            &inviter,
            &ctx.identity().x25519_public_key(),
        )
        .unwrap();

        let processed = pipeline.handle_direct(&sealed).await.unwrap();
        assert_eq!(processed, ProcessedMessage::Control);

        let db = ctx.db();
        assert_eq!(db.get_group(&group).unwrap().name, "book club");
        assert!(db.thread_exists(&group.to_hex()).unwrap());
        assert_eq!(db.list_group_key_pairs(&group).unwrap().len(), 1);

        let members = db.list_group_members(&group).unwrap();
        assert_eq!(members.len(), 2);
        let inviter_row = db.get_group_member(&group, &inviter.account_id()).unwrap();
        assert_eq!(inviter_row.role, GroupRole::Admin);

        // Config pushes for the new group and the user's group list.
        let jobs = db.list_jobs().unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.variant == VARIANT_CONFIG_SYNC));

        assert_eq!(notifier.push_subscriptions.lock().unwrap().as_slice(), &[group]);
    }

    #[tokio::test]
    async fn key_update_for_unknown_group_is_dropped() {
        let (ctx, _) = context();
        let pipeline = pipeline(&ctx);
        let sender = Identity::generate();
        let group = Identity::generate().account_id();

        let update = Content::GroupKeyUpdate(GroupKeyUpdate {
            group,
            public_key: [1; 32],
            secret_key: [2; 32],
            rotated_at_ms: 2_000,
        });
        let sealed = envelope::seal(
            &update.to_bytes().unwrap(),
            &sender,
            &ctx.identity().x25519_public_key(),
        )
        .unwrap();

        assert_eq!(
            pipeline.handle_direct(&sealed).await.unwrap(),
            ProcessedMessage::Dropped
        );
        assert!(ctx.db().list_group_key_pairs(&group).unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_receipt_only_emits_an_event() {
        let (ctx, _) = context();
        let pipeline = pipeline(&ctx);
        let sender = Identity::generate();
        let mut events = ctx.subscribe_events();

        let receipt = Content::ReadReceipt(ReadReceipt {
            timestamps: vec![1_000, 2_000],
        });
        let sealed = envelope::seal(
            &receipt.to_bytes().unwrap(),
            &sender,
            &ctx.identity().x25519_public_key(),
        )
        .unwrap();

        let processed = pipeline.handle_direct(&sealed).await.unwrap();
        assert_eq!(processed, ProcessedMessage::Control);

        match events.recv().await.unwrap() {
            ClientEvent::ReadReceipts { thread_id, timestamps } => {
                assert_eq!(thread_id, sender.account_id().to_hex());
                assert_eq!(timestamps, vec![1_000, 2_000]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn room_post_with_bad_signature_is_dropped() {
        let (ctx, _) = context();
        let pipeline = pipeline(&ctx);
        let poster = Identity::generate();
        let poster_keys = BlindedKeyPair::derive(&poster, &[3; 32]);

        let community = Community {
            key: "http://server.test:room".to_string(),
            server_url: "http://server.test".to_string(),
            room: "room".to_string(),
            server_pubkey: [3; 32],
            capabilities: Vec::new(),
            last_message_id: 0,
            last_inbox_id: 0,
            created_at: Utc::now(),
        };

        let content = visible(Uuid::new_v4(), "forged").to_bytes().unwrap();
        let message = RoomMessage {
            id: 1,
            poster: poster_keys.account_id().to_hex(),
            data: {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine;
                STANDARD.encode(&content)
            },
            signature: {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine;
                STANDARD.encode([0u8; 64])
            },
            posted_at_ms: 1_000,
        };

        assert_eq!(
            pipeline
                .handle_room_message(&community, &message)
                .await
                .unwrap(),
            ProcessedMessage::Dropped
        );
    }

    #[tokio::test]
    async fn signed_room_post_lands_in_the_community_thread() {
        let (ctx, _) = context();
        let pipeline = pipeline(&ctx);
        let poster = Identity::generate();
        let poster_keys = BlindedKeyPair::derive(&poster, &[3; 32]);

        let community = Community {
            key: "http://server.test:room".to_string(),
            server_url: "http://server.test".to_string(),
            room: "room".to_string(),
            server_pubkey: [3; 32],
            capabilities: Vec::new(),
            last_message_id: 0,
            last_inbox_id: 0,
            created_at: Utc::now(),
        };

        let message_id = Uuid::new_v4();
        let content = visible(message_id, "room hello").to_bytes().unwrap();
        let signature = poster_keys.sign(&content);
        let message = RoomMessage {
            id: 1,
            poster: poster_keys.account_id().to_hex(),
            data: {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine;
                STANDARD.encode(&content)
            },
            signature: {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine;
                STANDARD.encode(signature)
            },
            posted_at_ms: 1_000,
        };

        let processed = pipeline
            .handle_room_message(&community, &message)
            .await
            .unwrap();
        assert_eq!(
            processed,
            ProcessedMessage::Message {
                thread_id: community.key.clone(),
                message_id,
            }
        );
        assert!(ctx.db().thread_exists(&community.key).unwrap());
    }
}
