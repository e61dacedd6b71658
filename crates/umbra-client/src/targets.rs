//! The three pollable target kinds: the user's own swarm, group swarms,
//! and community servers.
//!
//! Each driver fetches whatever is new for its target, routes config
//! namespaces to the sync engine and message namespaces to the receive
//! pipeline, and advances its retrieval cursor only after the batch is
//! handled. Swarm payloads are deduplicated by content hash so re-fetching
//! an overlapping window never reprocesses a message.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use umbra_net::{RequestAuth, StoredMessage};
use umbra_shared::blinding::BlindedKeyPair;
use umbra_shared::{AccountId, ConfigNamespace};
use umbra_store::{Community, StoreError};

use crate::context::{now_ms, ClientContext};
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::pipeline::ReceivePipeline;
use crate::poller::PollDriver;
use crate::sync::{purge_group_local, SyncEngine};

/// Pair each namespace with its stored retrieval cursor.
fn cursors_for(
    ctx: &ClientContext,
    target: &AccountId,
    namespaces: &[ConfigNamespace],
) -> Result<Vec<(ConfigNamespace, Option<String>)>> {
    let db = ctx.db();
    namespaces
        .iter()
        .map(|ns| Ok((*ns, db.last_hash(target, ns.value())?)))
        .collect()
}

/// Drop messages already handled on a previous poll and decode the rest.
/// Returns the fresh payloads plus the newest hash for the cursor update.
fn take_fresh(
    ctx: &ClientContext,
    messages: &[StoredMessage],
) -> Result<(Vec<Vec<u8>>, Option<String>)> {
    let db = ctx.db();
    let now = Utc::now();
    let mut payloads = Vec::with_capacity(messages.len());
    for message in messages {
        if !db.mark_seen(&message.hash, now)? {
            continue;
        }
        match message.data_bytes() {
            Ok(bytes) => payloads.push(bytes),
            Err(e) => {
                warn!(hash = %message.hash, error = %e, "Skipping undecodable swarm payload");
            }
        }
    }
    Ok((payloads, messages.last().map(|m| m.hash.clone())))
}

// ---------------------------------------------------------------------------
// User swarm
// ---------------------------------------------------------------------------

/// Polls the account's own swarm: sealed direct messages plus the
/// user-owned config namespaces.
pub struct UserSwarmTarget {
    ctx: Arc<ClientContext>,
    sync: Arc<SyncEngine>,
    receive: Arc<ReceivePipeline>,
}

impl UserSwarmTarget {
    pub fn new(
        ctx: Arc<ClientContext>,
        sync: Arc<SyncEngine>,
        receive: Arc<ReceivePipeline>,
    ) -> Self {
        Self { ctx, sync, receive }
    }
}

#[async_trait]
impl PollDriver for UserSwarmTarget {
    fn key(&self) -> String {
        format!("user:{}", self.ctx.account_id().to_hex())
    }

    async fn poll_once(&self) -> Result<()> {
        let own = self.ctx.account_id();
        let namespaces = cursors_for(&self.ctx, &own, ConfigNamespace::user_namespaces())?;
        let batches = self
            .ctx
            .snode()
            .retrieve_batch(
                Some(RequestAuth::Standard(self.ctx.identity())),
                &own,
                &namespaces,
                now_ms(),
            )
            .await?;

        for (namespace, messages) in batches {
            let (payloads, newest) = take_fresh(&self.ctx, &messages)?;
            if namespace.is_config() {
                self.sync.apply_incoming(&own, namespace, &payloads).await?;
            } else {
                for payload in &payloads {
                    self.receive.handle_direct(payload).await?;
                }
            }
            if let Some(hash) = newest {
                self.ctx.db().set_last_hash(&own, namespace.value(), &hash)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Group swarm
// ---------------------------------------------------------------------------

/// Polls one group's swarm. Reads are unauthenticated; membership shows
/// only in being able to open the envelopes.
pub struct GroupSwarmTarget {
    ctx: Arc<ClientContext>,
    sync: Arc<SyncEngine>,
    receive: Arc<ReceivePipeline>,
    group: AccountId,
}

impl GroupSwarmTarget {
    pub fn new(
        ctx: Arc<ClientContext>,
        sync: Arc<SyncEngine>,
        receive: Arc<ReceivePipeline>,
        group: AccountId,
    ) -> Self {
        Self {
            ctx,
            sync,
            receive,
            group,
        }
    }
}

#[async_trait]
impl PollDriver for GroupSwarmTarget {
    fn key(&self) -> String {
        format!("group:{}", self.group.to_hex())
    }

    async fn poll_once(&self) -> Result<()> {
        let namespaces = cursors_for(&self.ctx, &self.group, ConfigNamespace::group_namespaces())?;
        let batches = self
            .ctx
            .snode()
            .retrieve_batch(None, &self.group, &namespaces, now_ms())
            .await?;

        for (namespace, messages) in batches {
            let (payloads, newest) = take_fresh(&self.ctx, &messages)?;
            if namespace.is_config() {
                self.sync
                    .apply_incoming(&self.group, namespace, &payloads)
                    .await?;
            } else {
                for payload in &payloads {
                    self.receive.handle_group(&self.group, payload).await?;
                }
            }
            if let Some(hash) = newest {
                self.ctx
                    .db()
                    .set_last_hash(&self.group, namespace.value(), &hash)?;
            }
        }
        Ok(())
    }

    fn is_user_visible(&self) -> bool {
        self.ctx
            .db()
            .thread_exists(&self.group.to_hex())
            .unwrap_or(true)
    }

    fn prune(&self) -> Result<()> {
        let db = self.ctx.db();
        purge_group_local(&self.ctx, &db, &self.group)
    }
}

// ---------------------------------------------------------------------------
// Community server
// ---------------------------------------------------------------------------

/// Polls one community server: room posts for the shared thread and the
/// blinded inbox for pseudonymous direct messages.
pub struct CommunityTarget {
    ctx: Arc<ClientContext>,
    receive: Arc<ReceivePipeline>,
    community_key: String,
}

impl CommunityTarget {
    pub fn new(
        ctx: Arc<ClientContext>,
        receive: Arc<ReceivePipeline>,
        community_key: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            receive,
            community_key: community_key.into(),
        }
    }

    fn load(&self) -> Result<Community> {
        match self.ctx.db().get_community(&self.community_key) {
            Ok(community) => Ok(community),
            Err(StoreError::NotFound) => {
                Err(ClientError::UnknownCommunity(self.community_key.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PollDriver for CommunityTarget {
    fn key(&self) -> String {
        format!("community:{}", self.community_key)
    }

    async fn poll_once(&self) -> Result<()> {
        let community = self.load()?;
        let keys = BlindedKeyPair::derive(self.ctx.identity(), &community.server_pubkey);
        let client = self
            .ctx
            .community(&community.server_url, community.server_pubkey);
        let now = now_ms();

        let posts = client
            .room_messages(
                &keys,
                &community.room,
                (community.last_message_id > 0).then_some(community.last_message_id),
                now,
            )
            .await?;
        let inbox = client
            .inbox(
                &keys,
                (community.last_inbox_id > 0).then_some(community.last_inbox_id),
                now,
            )
            .await?;

        let mut last_message_id = community.last_message_id;
        for post in &posts {
            self.receive.handle_room_message(&community, post).await?;
            last_message_id = last_message_id.max(post.id);
        }
        let mut last_inbox_id = community.last_inbox_id;
        for message in &inbox {
            self.receive.handle_inbox_message(&keys, message).await?;
            last_inbox_id = last_inbox_id.max(message.id);
        }

        if last_message_id != community.last_message_id
            || last_inbox_id != community.last_inbox_id
        {
            self.ctx
                .db()
                .set_community_cursors(&community.key, last_message_id, last_inbox_id)?;
        }
        Ok(())
    }

    async fn refresh_capabilities(&self) -> Result<()> {
        let community = self.load()?;
        let client = self
            .ctx
            .community(&community.server_url, community.server_pubkey);
        let capabilities = client.capabilities().await?;
        self.ctx
            .db()
            .set_community_capabilities(&community.key, &capabilities)?;
        Ok(())
    }

    fn is_user_visible(&self) -> bool {
        self.ctx
            .db()
            .thread_exists(&self.community_key)
            .unwrap_or(true)
    }

    fn prune(&self) -> Result<()> {
        let db = self.ctx.db();
        db.delete_community(&self.community_key)?;
        db.delete_messages_for_thread(&self.community_key)?;
        if db.delete_thread(&self.community_key)? {
            self.ctx.emit(ClientEvent::ThreadDeleted {
                thread_id: self.community_key.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::jobs::JobRunner;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;
    use umbra_net::{MockBackend, RoomMessage};
    use umbra_shared::protocol::{Content, VisibleMessage};
    use umbra_shared::{envelope, Identity};
    use umbra_store::{Group, GroupKeyPair, Thread, ThreadKind};
    use uuid::Uuid;

    fn engines(ctx: &Arc<ClientContext>) -> (Arc<SyncEngine>, Arc<ReceivePipeline>) {
        let sync = SyncEngine::new(ctx.clone());
        let jobs = JobRunner::new(ctx.clone());
        let receive = Arc::new(ReceivePipeline::new(ctx.clone(), sync.clone(), jobs));
        (sync, receive)
    }

    fn visible(message_id: Uuid, body: &str) -> Vec<u8> {
        Content::Visible(VisibleMessage {
            message_id,
            body: Some(body.to_string()),
            attachment_ids: Vec::new(),
            profile: None,
            sent_at_ms: 1_000,
        })
        .to_bytes()
        .unwrap()
    }

    /// Queue one swarm batch response where only `full` carries a message.
    fn push_batch(
        mock: &MockBackend,
        namespaces: &[ConfigNamespace],
        full: ConfigNamespace,
        hash: &str,
        payload: &[u8],
    ) {
        let replies: Vec<_> = namespaces
            .iter()
            .map(|ns| {
                let messages = if *ns == full {
                    json!([{
                        "hash": hash,
                        "timestamp_ms": 1_000,
                        "data": STANDARD.encode(payload),
                    }])
                } else {
                    json!([])
                };
                json!({ "code": 200, "body": { "messages": messages } })
            })
            .collect();
        mock.push_json(200, &json!({ "replies": replies }));
    }

    fn test_community(key: &str) -> Community {
        Community {
            key: key.to_string(),
            server_url: "http://server.test".to_string(),
            room: "lobby".to_string(),
            server_pubkey: [7; 32],
            capabilities: Vec::new(),
            last_message_id: 0,
            last_inbox_id: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn user_swarm_stores_direct_messages_and_advances_the_cursor() {
        let (ctx, mock) = context();
        let (sync, receive) = engines(&ctx);
        let target = UserSwarmTarget::new(ctx.clone(), sync, receive);

        let sender = Identity::generate();
        let message_id = Uuid::new_v4();
        let sealed = envelope::seal(
            &visible(message_id, "hello"),
            &sender,
            &ctx.identity().x25519_public_key(),
        )
        .unwrap();
        push_batch(
            &mock,
            ConfigNamespace::user_namespaces(),
            ConfigNamespace::Default,
            "h1",
            &sealed,
        );

        target.poll_once().await.unwrap();

        let db = ctx.db();
        assert_eq!(db.get_message(message_id).unwrap().body.as_deref(), Some("hello"));
        assert_eq!(
            db.last_hash(&ctx.account_id(), ConfigNamespace::Default.value())
                .unwrap()
                .as_deref(),
            Some("h1")
        );
    }

    #[tokio::test]
    async fn refetched_payloads_are_not_reprocessed() {
        let (ctx, mock) = context();
        let (sync, receive) = engines(&ctx);
        let target = UserSwarmTarget::new(ctx.clone(), sync, receive);

        let sender = Identity::generate();
        let sealed = envelope::seal(
            &visible(Uuid::new_v4(), "once"),
            &sender,
            &ctx.identity().x25519_public_key(),
        )
        .unwrap();
        for _ in 0..2 {
            push_batch(
                &mock,
                ConfigNamespace::user_namespaces(),
                ConfigNamespace::Default,
                "same-hash",
                &sealed,
            );
        }

        target.poll_once().await.unwrap();
        target.poll_once().await.unwrap();

        let db = ctx.db();
        let thread_id = sender.account_id().to_hex();
        assert_eq!(
            db.list_messages_for_thread(&thread_id, 10, 0).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn group_swarm_routes_sealed_messages_through_the_group_keys() {
        let (ctx, mock) = context();
        let (sync, receive) = engines(&ctx);
        let group = Identity::generate().account_id();
        let group_identity = Identity::generate();
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
        let target = GroupSwarmTarget::new(ctx.clone(), sync, receive, group);

        let sender = Identity::generate();
        let message_id = Uuid::new_v4();
        let sealed = envelope::seal(
            &visible(message_id, "group hello"),
            &sender,
            &group_identity.x25519_public_key(),
        )
        .unwrap();
        push_batch(
            &mock,
            ConfigNamespace::group_namespaces(),
            ConfigNamespace::GroupMessages,
            "g1",
            &sealed,
        );

        target.poll_once().await.unwrap();

        let db = ctx.db();
        assert_eq!(db.get_message(message_id).unwrap().thread_id, group.to_hex());
        assert_eq!(
            db.last_hash(&group, ConfigNamespace::GroupMessages.value())
                .unwrap()
                .as_deref(),
            Some("g1")
        );
    }

    #[tokio::test]
    async fn pruned_group_target_drops_all_local_state() {
        let (ctx, _) = context();
        let (sync, receive) = engines(&ctx);
        let group = Identity::generate().account_id();
        {
            let db = ctx.db();
            db.upsert_group(&Group {
                id: group,
                name: "stale".to_string(),
                identity_seed: None,
                created_at: Utc::now(),
            })
            .unwrap();
            db.upsert_thread(&Thread {
                id: group.to_hex(),
                kind: ThreadKind::Group,
                priority: 0,
                created_at: Utc::now(),
            })
            .unwrap();
        }
        let target = GroupSwarmTarget::new(ctx.clone(), sync, receive, group);
        assert!(target.is_user_visible());

        target.prune().unwrap();

        let db = ctx.db();
        assert!(db.get_group(&group).is_err());
        assert!(!db.thread_exists(&group.to_hex()).unwrap());
    }

    #[tokio::test]
    async fn community_poll_ingests_posts_and_advances_cursors() {
        let (ctx, mock) = context();
        let (_, receive) = engines(&ctx);
        let community = test_community("http://server.test:lobby");
        ctx.db().upsert_community(&community).unwrap();
        let target = CommunityTarget::new(ctx.clone(), receive, community.key.clone());

        let poster = Identity::generate();
        let poster_keys = BlindedKeyPair::derive(&poster, &community.server_pubkey);
        let content = visible(Uuid::new_v4(), "room hello");
        let signature = poster_keys.sign(&content);
        let post = RoomMessage {
            id: 42,
            poster: poster_keys.account_id().to_hex(),
            data: STANDARD.encode(&content),
            signature: STANDARD.encode(signature),
            posted_at_ms: 1_000,
        };
        mock.push_json(200, &vec![post]);
        mock.push_json(200, &json!([]));

        target.poll_once().await.unwrap();

        let db = ctx.db();
        assert!(db.thread_exists(&community.key).unwrap());
        assert_eq!(db.get_community(&community.key).unwrap().last_message_id, 42);
    }

    #[tokio::test]
    async fn unknown_community_fails_terminally() {
        let (ctx, _) = context();
        let (_, receive) = engines(&ctx);
        let target = CommunityTarget::new(ctx.clone(), receive, "http://gone.test:lobby");

        let err = target.poll_once().await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownCommunity(_)));
    }

    #[tokio::test]
    async fn refresh_capabilities_updates_the_stored_list() {
        let (ctx, mock) = context();
        let (_, receive) = engines(&ctx);
        let community = test_community("http://server.test:lobby");
        ctx.db().upsert_community(&community).unwrap();
        let target = CommunityTarget::new(ctx.clone(), receive, community.key.clone());

        mock.push_json(200, &json!({ "capabilities": ["rooms", "blind"] }));
        target.refresh_capabilities().await.unwrap();

        let stored = ctx.db().get_community(&community.key).unwrap();
        assert!(stored.capabilities.iter().any(|c| c == "blind"));
    }

    #[tokio::test]
    async fn pruned_community_target_drops_local_rows() {
        let (ctx, _) = context();
        let (_, receive) = engines(&ctx);
        let community = test_community("http://server.test:lobby");
        {
            let db = ctx.db();
            db.upsert_community(&community).unwrap();
            db.upsert_thread(&Thread {
                id: community.key.clone(),
                kind: ThreadKind::Community,
                priority: 0,
                created_at: Utc::now(),
            })
            .unwrap();
        }
        let target = CommunityTarget::new(ctx.clone(), receive, community.key.clone());

        target.prune().unwrap();

        let db = ctx.db();
        assert!(matches!(
            db.get_community(&community.key),
            Err(StoreError::NotFound)
        ));
        assert!(!db.thread_exists(&community.key).unwrap());
    }
}
