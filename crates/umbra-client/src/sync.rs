//! Config synchronization engine.
//!
//! Owns the read-merge-write cycle for every [`ConfigObject`]: incoming
//! swarm payloads are trial-decrypted, merged into the local object, and the
//! result is applied to the database and re-persisted as a dump. Local
//! mutations go through the same per-`(owner, namespace)` lock so a merge
//! and a push can never interleave on the same object.
//!
//! Pushing is read-modify-push: the dirty object serializes a complete
//! snapshot, the snapshot is sealed and stored in the owner's swarm, and
//! only a confirmed store clears the dirty flag. A write that lands during
//! the round trip keeps the object dirty, so nothing is lost.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use umbra_config::{
    ConfigDelta, ConfigMessage, ConfigObject, ContactChanges, ContactsConfig, GroupInfoConfig,
    GroupKeysConfig, GroupMemberChanges, GroupMembersConfig, UserGroupChanges, UserGroupsConfig,
    UserProfileConfig,
};
use umbra_net::RequestAuth;
use umbra_shared::protocol::ProfileUpdate;
use umbra_shared::{AccountId, ConfigNamespace};
use umbra_store::{
    Community, Contact, Database, Group, GroupKeyPair, GroupMember, StoreError, Thread, ThreadKind,
};

use crate::context::{now_ms, ClientContext};
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::replay::SharedFetch;

/// What a merge did, reported to the caller for logging and tests.
#[derive(Debug)]
pub enum MergeOutcome {
    Profile { changed: bool },
    Contacts(ContactChanges),
    UserGroups(UserGroupChanges),
    GroupInfo { group: AccountId, changed: bool },
    GroupMembers { group: AccountId, changes: GroupMemberChanges },
    GroupKeys { group: AccountId, added: Vec<[u8; 32]> },
}

type PushLock = Arc<Mutex<()>>;

pub struct SyncEngine {
    ctx: Arc<ClientContext>,
    /// One lock per (owner, namespace), created lazily.
    push_locks: std::sync::Mutex<HashMap<(AccountId, ConfigNamespace), PushLock>>,
    /// One-time display-name fetch after account restore.
    display_name: SharedFetch<String>,
}

impl SyncEngine {
    pub fn new(ctx: Arc<ClientContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            push_locks: std::sync::Mutex::new(HashMap::new()),
            display_name: SharedFetch::new(),
        })
    }

    fn push_lock(&self, owner: &AccountId, namespace: ConfigNamespace) -> PushLock {
        let mut locks = self
            .push_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks
            .entry((*owner, namespace))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // -----------------------------------------------------------------------
    // Incoming merges
    // -----------------------------------------------------------------------

    /// Decrypt, merge, and apply a batch of raw swarm payloads for one
    /// namespace. Payloads that fail to parse or decrypt are skipped with a
    /// warning; a single bad snapshot never poisons the batch.
    pub async fn apply_incoming(
        &self,
        owner: &AccountId,
        namespace: ConfigNamespace,
        payloads: &[Vec<u8>],
    ) -> Result<Option<MergeOutcome>> {
        if payloads.is_empty() || !namespace.is_config() {
            return Ok(None);
        }

        let lock = self.push_lock(owner, namespace);
        let _guard = lock.lock().await;

        let materials = self.read_key_materials(owner, namespace)?;
        let mut deltas = Vec::new();
        for raw in payloads {
            let message = match ConfigMessage::from_bytes(raw) {
                Ok(message) => message,
                Err(e) => {
                    warn!(owner = %owner.short(), ?namespace, error = %e, "Skipping malformed config payload");
                    continue;
                }
            };
            if message.namespace != namespace {
                warn!(
                    owner = %owner.short(),
                    expected = ?namespace,
                    got = ?message.namespace,
                    "Skipping config payload filed under the wrong namespace"
                );
                continue;
            }

            let opened = materials
                .iter()
                .find_map(|material| message.open(material).ok());
            match opened {
                Some(data) => deltas.push(ConfigDelta {
                    seqno: message.seqno,
                    data,
                }),
                None => {
                    warn!(
                        owner = %owner.short(),
                        ?namespace,
                        seqno = message.seqno,
                        "Skipping config snapshot no retained key opens"
                    );
                }
            }
        }

        if deltas.is_empty() {
            return Ok(None);
        }
        deltas.sort_by_key(|d| d.seqno);

        let outcome = match namespace {
            ConfigNamespace::Contacts => self.merge_contacts(owner, &deltas)?,
            ConfigNamespace::UserProfile => self.merge_profile(owner, &deltas)?,
            ConfigNamespace::UserGroups => self.merge_user_groups(owner, &deltas)?,
            ConfigNamespace::GroupInfo => self.merge_group_info(owner, &deltas)?,
            ConfigNamespace::GroupMembers => self.merge_group_members(owner, &deltas)?,
            ConfigNamespace::GroupKeys => self.merge_group_keys(owner, &deltas)?,
            ConfigNamespace::Default | ConfigNamespace::GroupMessages => return Ok(None),
        };

        debug!(owner = %owner.short(), ?namespace, ?outcome, "Merged config snapshots");
        Ok(Some(outcome))
    }

    fn merge_contacts(&self, owner: &AccountId, deltas: &[ConfigDelta]) -> Result<MergeOutcome> {
        let db = self.ctx.db();
        let mut config = load_or(&db, owner, ContactsConfig::new)?;
        let changes = config.merge(deltas)?;

        for id in &changes.changed {
            let Some(entry) = config.get(id) else { continue };
            db.upsert_contact(&Contact {
                id: *id,
                name: entry.name().to_string(),
                nickname: entry.nickname().map(String::from),
                picture_url: entry.picture_url().map(String::from),
                picture_key: entry.picture_key().map(Vec::from),
                is_approved: entry.is_approved(),
                did_approve_me: entry.did_approve_me(),
                is_blocked: entry.is_blocked(),
                created_at: ms_to_utc(entry.created_at_ms()),
            })?;

            let thread_id = id.to_hex();
            if entry.hidden() {
                if db.delete_thread(&thread_id)? {
                    self.ctx.emit(ClientEvent::ThreadDeleted { thread_id });
                }
            } else if db.thread_exists(&thread_id)? {
                db.set_thread_priority(&thread_id, entry.priority())?;
            } else {
                db.upsert_thread(&Thread {
                    id: thread_id.clone(),
                    kind: ThreadKind::Direct,
                    priority: entry.priority(),
                    created_at: Utc::now(),
                })?;
                self.ctx.emit(ClientEvent::ThreadCreated { thread_id });
            }
        }

        for id in &changes.removed {
            db.delete_contact(id)?;
            let thread_id = id.to_hex();
            db.delete_messages_for_thread(&thread_id)?;
            if db.delete_thread(&thread_id)? {
                self.ctx.emit(ClientEvent::ThreadDeleted { thread_id });
            }
        }

        save(&db, owner, &config)?;
        if !changes.changed.is_empty() || !changes.removed.is_empty() {
            self.ctx.emit(ClientEvent::ContactsUpdated {
                changed: changes.changed.clone(),
                removed: changes.removed.clone(),
            });
        }
        Ok(MergeOutcome::Contacts(changes))
    }

    fn merge_profile(&self, owner: &AccountId, deltas: &[ConfigDelta]) -> Result<MergeOutcome> {
        let db = self.ctx.db();
        let mut config = load_or(&db, owner, UserProfileConfig::new)?;
        let changed = config.merge(deltas)?;
        save(&db, owner, &config)?;
        if changed {
            self.ctx.emit(ClientEvent::ProfileUpdated);
        }
        Ok(MergeOutcome::Profile { changed })
    }

    fn merge_user_groups(&self, owner: &AccountId, deltas: &[ConfigDelta]) -> Result<MergeOutcome> {
        let db = self.ctx.db();
        let mut config = load_or(&db, owner, UserGroupsConfig::new)?;
        let changes = config.merge(deltas)?;

        for group in &changes.groups_changed {
            let Some(entry) = config.group(group) else { continue };
            // The group row itself arrives with the invite; until then the
            // entry is only bookkeeping.
            if db.get_group(group).is_err() {
                continue;
            }
            let thread_id = group.to_hex();
            if entry.hidden() {
                if db.delete_thread(&thread_id)? {
                    self.ctx.emit(ClientEvent::ThreadDeleted { thread_id });
                }
            } else if db.thread_exists(&thread_id)? {
                db.set_thread_priority(&thread_id, entry.priority())?;
            } else {
                db.upsert_thread(&Thread {
                    id: thread_id.clone(),
                    kind: ThreadKind::Group,
                    priority: entry.priority(),
                    created_at: Utc::now(),
                })?;
                self.ctx.emit(ClientEvent::ThreadCreated { thread_id });
            }
        }

        for group in &changes.groups_removed {
            purge_group_local(&self.ctx, &db, group)?;
        }

        for key in &changes.communities_changed {
            let entry = config
                .communities()
                .find(|e| &umbra_config::user_groups::community_key(&e.server_url, &e.room) == key);
            let Some(entry) = entry else { continue };

            if db.get_community(key).is_err() {
                db.upsert_community(&Community {
                    key: key.clone(),
                    server_url: entry.server_url.clone(),
                    room: entry.room.clone(),
                    server_pubkey: entry.server_pubkey,
                    capabilities: Vec::new(),
                    last_message_id: 0,
                    last_inbox_id: 0,
                    created_at: Utc::now(),
                })?;
            }

            if entry.hidden() {
                if db.delete_thread(key)? {
                    self.ctx.emit(ClientEvent::ThreadDeleted {
                        thread_id: key.clone(),
                    });
                }
            } else if db.thread_exists(key)? {
                db.set_thread_priority(key, entry.priority())?;
            } else {
                db.upsert_thread(&Thread {
                    id: key.clone(),
                    kind: ThreadKind::Community,
                    priority: entry.priority(),
                    created_at: Utc::now(),
                })?;
                self.ctx.emit(ClientEvent::ThreadCreated {
                    thread_id: key.clone(),
                });
            }
        }

        for key in &changes.communities_removed {
            db.delete_community(key)?;
            db.delete_messages_for_thread(key)?;
            if db.delete_thread(key)? {
                self.ctx.emit(ClientEvent::ThreadDeleted {
                    thread_id: key.clone(),
                });
            }
        }

        save(&db, owner, &config)?;
        Ok(MergeOutcome::UserGroups(changes))
    }

    fn merge_group_info(&self, group: &AccountId, deltas: &[ConfigDelta]) -> Result<MergeOutcome> {
        let db = self.ctx.db();
        let mut config = load_or(&db, group, || GroupInfoConfig::new(String::new(), 0))?;
        let changed = config.merge(deltas)?;

        if changed {
            if let Ok(mut row) = db.get_group(group) {
                row.name = config.name().to_string();
                db.upsert_group(&row)?;
            }
            self.ctx.emit(ClientEvent::GroupUpdated { group: *group });
        }

        save(&db, group, &config)?;
        Ok(MergeOutcome::GroupInfo {
            group: *group,
            changed,
        })
    }

    fn merge_group_members(
        &self,
        group: &AccountId,
        deltas: &[ConfigDelta],
    ) -> Result<MergeOutcome> {
        let db = self.ctx.db();
        let mut config = load_or(&db, group, GroupMembersConfig::new)?;
        let changes = config.merge(deltas)?;
        let own_id = self.ctx.account_id();

        for member in &changes.changed {
            let Some(entry) = config.get(member) else { continue };
            db.upsert_group_member(&GroupMember {
                group_id: *group,
                member_id: *member,
                role: entry.role(),
                role_status: entry.role_status(),
                added_at: ms_to_utc(entry.added_at_ms()),
            })?;
            self.ctx.emit(ClientEvent::MemberStatusChanged {
                group: *group,
                member: *member,
                status: entry.role_status(),
            });
        }

        for member in &changes.removed {
            if *member == own_id {
                // We were removed from the roster by an admin.
                purge_group_local(&self.ctx, &db, group)?;
                save(&db, group, &config)?;
                return Ok(MergeOutcome::GroupMembers {
                    group: *group,
                    changes,
                });
            }
            db.delete_group_member(group, member)?;
        }

        save(&db, group, &config)?;
        if !changes.changed.is_empty() || !changes.removed.is_empty() {
            self.ctx.emit(ClientEvent::GroupUpdated { group: *group });
        }
        Ok(MergeOutcome::GroupMembers {
            group: *group,
            changes,
        })
    }

    fn merge_group_keys(&self, group: &AccountId, deltas: &[ConfigDelta]) -> Result<MergeOutcome> {
        let db = self.ctx.db();
        let mut config = load_or(&db, group, GroupKeysConfig::new)?;
        let added = config.merge(deltas)?;

        for public in &added {
            let Some(entry) = config.newest_first().into_iter().find(|e| &e.public == public)
            else {
                continue;
            };
            db.insert_group_key_pair(&GroupKeyPair {
                group_id: *group,
                public_key: entry.public,
                secret_key: entry.secret,
                received_at: ms_to_utc(entry.received_at_ms),
            })?;
        }

        // Drop keys past the retention window, both in the object and the
        // key-pair rows backing trial decryption.
        let retention_ms = self.ctx.config().key_retention.as_millis() as u64;
        config.purge_expired(retention_ms, now_ms());
        for row in db.list_group_key_pairs(group)? {
            if !config.contains(&row.public_key) {
                db.delete_group_key_pair(group, &row.public_key)?;
            }
        }

        save(&db, group, &config)?;
        if !added.is_empty() {
            self.ctx.emit(ClientEvent::GroupKeyRotated { group: *group });
        }
        Ok(MergeOutcome::GroupKeys {
            group: *group,
            added,
        })
    }

    // -----------------------------------------------------------------------
    // Outgoing pushes
    // -----------------------------------------------------------------------

    /// Push the namespace's object if it is dirty. Returns whether a store
    /// happened. The per-object lock serializes this against merges and
    /// other pushes, so a snapshot is never double-stored.
    pub async fn push_pending(&self, owner: &AccountId, namespace: ConfigNamespace) -> Result<bool> {
        let lock = self.push_lock(owner, namespace);
        let _guard = lock.lock().await;

        match namespace {
            ConfigNamespace::Contacts => self.push_object::<ContactsConfig>(owner).await,
            ConfigNamespace::UserProfile => self.push_object::<UserProfileConfig>(owner).await,
            ConfigNamespace::UserGroups => self.push_object::<UserGroupsConfig>(owner).await,
            ConfigNamespace::GroupInfo => self.push_object::<GroupInfoConfig>(owner).await,
            ConfigNamespace::GroupMembers => self.push_object::<GroupMembersConfig>(owner).await,
            ConfigNamespace::GroupKeys => self.push_object::<GroupKeysConfig>(owner).await,
            ConfigNamespace::Default | ConfigNamespace::GroupMessages => Ok(false),
        }
    }

    async fn push_object<C: ConfigObject>(&self, owner: &AccountId) -> Result<bool> {
        let material = self.write_key_material(owner, C::NAMESPACE)?;
        let now = now_ms();

        let (wire, seqno, mut object) = {
            let db = self.ctx.db();
            let dump = match db.load_config_dump(C::NAMESPACE.value(), owner) {
                Ok(dump) => dump,
                Err(StoreError::NotFound) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            let mut object = C::from_dump(&dump)?;
            if !object.is_dirty() {
                return Ok(false);
            }
            let pending = object.push(now)?;
            let message =
                ConfigMessage::seal(C::NAMESPACE, pending.seqno, &pending.data, &material, now)?;
            (message.to_bytes()?, pending.seqno, object)
        };

        let own_id = self.ctx.account_id();
        let auth = (*owner == own_id).then(|| RequestAuth::Standard(self.ctx.identity()));
        self.ctx
            .snode()
            .store(
                auth,
                owner,
                C::NAMESPACE,
                &wire,
                self.ctx.config().message_ttl_ms,
                now,
            )
            .await?;

        object.confirm_pushed(seqno);
        let db = self.ctx.db();
        save(&db, owner, &object)?;
        debug!(owner = %owner.short(), namespace = ?C::NAMESPACE, seqno, "Pushed config snapshot");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Local mutations
    // -----------------------------------------------------------------------

    /// Load, mutate, and re-persist a config object under its push lock.
    pub(crate) async fn update<C, D, F>(&self, owner: &AccountId, default: D, f: F) -> Result<()>
    where
        C: ConfigObject,
        D: FnOnce() -> C,
        F: FnOnce(&mut C, u64),
    {
        let lock = self.push_lock(owner, C::NAMESPACE);
        let _guard = lock.lock().await;

        let db = self.ctx.db();
        let mut config = load_or(&db, owner, default)?;
        f(&mut config, now_ms());
        save(&db, owner, &config)
    }

    /// Add or rename a contact. Own and blinded ids never enter the synced
    /// contact list; blinded ids are per-server pseudonyms and leaking one
    /// into a pushed snapshot would link it to the real account.
    pub async fn track_contact(&self, id: AccountId, name: String) -> Result<()> {
        if id == self.ctx.account_id() || id.is_blinded() {
            warn!(contact = %id.short(), "Refusing to track own or blinded id as a contact");
            return Ok(());
        }
        let own = self.ctx.account_id();
        self.update(&own, ContactsConfig::new, |config: &mut ContactsConfig, now| {
            config.set_name(id, name, now);
        })
        .await
    }

    pub async fn set_contact_approved(&self, id: AccountId) -> Result<()> {
        let own = self.ctx.account_id();
        self.update(&own, ContactsConfig::new, |config: &mut ContactsConfig, now| {
            config.set_approved(id, now);
        })
        .await
    }

    pub async fn set_contact_blocked(&self, id: AccountId, blocked: bool) -> Result<()> {
        let own = self.ctx.account_id();
        self.update(&own, ContactsConfig::new, |config: &mut ContactsConfig, now| {
            config.set_blocked(id, blocked, now);
        })
        .await
    }

    pub async fn remove_contact(&self, id: AccountId) -> Result<()> {
        let own = self.ctx.account_id();
        self.update(&own, ContactsConfig::new, |config: &mut ContactsConfig, _| {
            config.remove(&id);
        })
        .await?;

        let db = self.ctx.db();
        db.delete_contact(&id)?;
        let thread_id = id.to_hex();
        db.delete_messages_for_thread(&thread_id)?;
        if db.delete_thread(&thread_id)? {
            self.ctx.emit(ClientEvent::ThreadDeleted { thread_id });
        }
        Ok(())
    }

    pub async fn set_profile_name(&self, name: String) -> Result<()> {
        let own = self.ctx.account_id();
        self.update(&own, UserProfileConfig::new, |config: &mut UserProfileConfig, now| {
            config.set_name(name, now);
        })
        .await?;
        self.ctx.emit(ClientEvent::ProfileUpdated);
        Ok(())
    }

    pub async fn set_profile_picture(
        &self,
        url: Option<String>,
        key: Option<Vec<u8>>,
    ) -> Result<()> {
        let own = self.ctx.account_id();
        self.update(&own, UserProfileConfig::new, |config: &mut UserProfileConfig, now| {
            config.set_picture(url, key, now);
        })
        .await?;
        self.ctx.emit(ClientEvent::ProfileUpdated);
        Ok(())
    }

    /// The profile fields piggybacked onto outgoing messages, if a profile
    /// has been set.
    pub fn profile_update(&self) -> Result<Option<ProfileUpdate>> {
        let db = self.ctx.db();
        let config: UserProfileConfig = load_or(&db, &self.ctx.account_id(), UserProfileConfig::new)?;
        Ok(config.as_profile_update())
    }

    /// Fetch the display name stored in the user's swarm, once. Used after
    /// account restore; concurrent callers share one network fetch.
    pub async fn fetch_display_name(&self) -> Result<String> {
        self.display_name
            .get_or_fetch(|| self.fetch_display_name_once())
            .await
    }

    async fn fetch_display_name_once(&self) -> Result<String> {
        let now = now_ms();
        let own_id = self.ctx.account_id();
        let messages = self
            .ctx
            .snode()
            .retrieve(
                Some(RequestAuth::Standard(self.ctx.identity())),
                &own_id,
                ConfigNamespace::UserProfile,
                None,
                now,
            )
            .await?;

        let mut payloads = Vec::with_capacity(messages.len());
        for message in &messages {
            payloads.push(message.data_bytes().map_err(ClientError::from)?);
        }
        self.apply_incoming(&own_id, ConfigNamespace::UserProfile, &payloads)
            .await?;

        let db = self.ctx.db();
        let config: UserProfileConfig = load_or(&db, &own_id, UserProfileConfig::new)?;
        Ok(config.name().to_string())
    }

    // -----------------------------------------------------------------------
    // Key material
    // -----------------------------------------------------------------------

    /// Every key that may open snapshots in this namespace, newest first.
    fn read_key_materials(
        &self,
        owner: &AccountId,
        namespace: ConfigNamespace,
    ) -> Result<Vec<[u8; 32]>> {
        if ConfigNamespace::user_namespaces().contains(&namespace) {
            return Ok(vec![*self.ctx.identity().seed()]);
        }
        let mut pairs = self.ctx.db().list_group_key_pairs(owner)?;
        pairs.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(pairs.into_iter().map(|p| p.secret_key).collect())
    }

    /// The single key new snapshots are sealed under.
    fn write_key_material(
        &self,
        owner: &AccountId,
        namespace: ConfigNamespace,
    ) -> Result<[u8; 32]> {
        if ConfigNamespace::user_namespaces().contains(&namespace) {
            return Ok(*self.ctx.identity().seed());
        }
        self.ctx
            .db()
            .current_group_key_pair(owner)?
            .map(|pair| pair.secret_key)
            .ok_or(ClientError::NoGroupKey(*owner))
    }
}

/// Delete everything the client holds for a group: rows, thread, messages,
/// retrieval cursors, and config dumps.
pub(crate) fn purge_group_local(
    ctx: &ClientContext,
    db: &Database,
    group: &AccountId,
) -> Result<()> {
    for member in db.list_group_members(group)? {
        db.delete_group_member(group, &member.member_id)?;
    }
    for pair in db.list_group_key_pairs(group)? {
        db.delete_group_key_pair(group, &pair.public_key)?;
    }
    db.delete_group(group)?;
    db.delete_config_dumps_for_owner(group)?;
    db.clear_last_hashes(group)?;

    let thread_id = group.to_hex();
    db.delete_messages_for_thread(&thread_id)?;
    if db.delete_thread(&thread_id)? {
        ctx.emit(ClientEvent::ThreadDeleted { thread_id });
    }
    Ok(())
}

fn load_or<C: ConfigObject>(
    db: &Database,
    owner: &AccountId,
    default: impl FnOnce() -> C,
) -> Result<C> {
    match db.load_config_dump(C::NAMESPACE.value(), owner) {
        Ok(dump) => Ok(C::from_dump(&dump)?),
        Err(StoreError::NotFound) => Ok(default()),
        Err(e) => Err(e.into()),
    }
}

fn save<C: ConfigObject>(db: &Database, owner: &AccountId, object: &C) -> Result<()> {
    db.save_config_dump(C::NAMESPACE.value(), owner, &object.dump()?, Utc::now())?;
    Ok(())
}

fn ms_to_utc(ms: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use umbra_shared::Identity;

    fn sealed_contacts_snapshot(
        owner: &Identity,
        contact: AccountId,
        name: &str,
        seqno: u64,
    ) -> Vec<u8> {
        let mut config = ContactsConfig::new();
        config.set_name(contact, name.to_string(), 1_000);
        config.set_approved(contact, 1_000);
        let pending = config.push(1_000).unwrap();
        ConfigMessage::seal(
            ConfigNamespace::Contacts,
            seqno,
            &pending.data,
            owner.seed(),
            1_000,
        )
        .unwrap()
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn incoming_contacts_create_rows_and_thread() {
        let (ctx, _) = context();
        let sync = SyncEngine::new(ctx.clone());
        let contact = Identity::generate().account_id();
        let payload = sealed_contacts_snapshot(ctx.identity(), contact, "alice", 1);

        let outcome = sync
            .apply_incoming(&ctx.account_id(), ConfigNamespace::Contacts, &[payload])
            .await
            .unwrap();

        match outcome {
            Some(MergeOutcome::Contacts(changes)) => {
                assert_eq!(changes.changed, vec![contact]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let db = ctx.db();
        let row = db.get_contact(&contact).unwrap();
        assert_eq!(row.name, "alice");
        assert!(row.is_approved);
        assert!(db.thread_exists(&contact.to_hex()).unwrap());
    }

    #[tokio::test]
    async fn undecryptable_snapshot_is_skipped() {
        let (ctx, _) = context();
        let sync = SyncEngine::new(ctx.clone());
        let stranger = Identity::generate();
        let contact = Identity::generate().account_id();
        // Sealed under someone else's seed.
        let payload = sealed_contacts_snapshot(&stranger, contact, "mallory", 1);

        let outcome = sync
            .apply_incoming(&ctx.account_id(), ConfigNamespace::Contacts, &[payload])
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(ctx.db().get_contact(&contact).is_err());
    }

    #[tokio::test]
    async fn push_stores_and_clears_dirty() {
        let (ctx, mock) = context();
        let sync = SyncEngine::new(ctx.clone());
        let contact = Identity::generate().account_id();
        sync.track_contact(contact, "bob".to_string()).await.unwrap();

        mock.push_json(200, &serde_json::json!({ "hash": "h1" }));
        let pushed = sync
            .push_pending(&ctx.account_id(), ConfigNamespace::Contacts)
            .await
            .unwrap();
        assert!(pushed);
        assert_eq!(mock.request_count(), 1);

        // Nothing dirty remains: a second push is a no-op.
        let pushed = sync
            .push_pending(&ctx.account_id(), ConfigNamespace::Contacts)
            .await
            .unwrap();
        assert!(!pushed);
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn failed_push_keeps_object_dirty() {
        let (ctx, mock) = context();
        let sync = SyncEngine::new(ctx.clone());
        let contact = Identity::generate().account_id();
        sync.track_contact(contact, "bob".to_string()).await.unwrap();

        mock.push_response(500, b"storage failure".to_vec());
        assert!(sync
            .push_pending(&ctx.account_id(), ConfigNamespace::Contacts)
            .await
            .is_err());

        mock.push_json(200, &serde_json::json!({ "hash": "h2" }));
        let pushed = sync
            .push_pending(&ctx.account_id(), ConfigNamespace::Contacts)
            .await
            .unwrap();
        assert!(pushed);
    }

    #[tokio::test]
    async fn own_and_blinded_ids_never_enter_contacts() {
        let (ctx, _) = context();
        let sync = SyncEngine::new(ctx.clone());

        sync.track_contact(ctx.account_id(), "me".to_string())
            .await
            .unwrap();
        sync.track_contact(AccountId::blinded15([9; 32]), "pseudonym".to_string())
            .await
            .unwrap();

        let db = ctx.db();
        let config: ContactsConfig = load_or(&db, &ctx.account_id(), ContactsConfig::new).unwrap();
        assert!(config.is_empty());
    }

    #[tokio::test]
    async fn group_key_merge_populates_trial_keys() {
        let (ctx, _) = context();
        let sync = SyncEngine::new(ctx.clone());
        let group = Identity::generate().account_id();

        // Seed one key locally so incoming snapshots can be opened.
        let first = GroupKeyPair {
            group_id: group,
            public_key: [1; 32],
            secret_key: [2; 32],
            received_at: Utc::now(),
        };
        ctx.db()
            .upsert_group(&Group {
                id: group,
                name: "club".to_string(),
                identity_seed: None,
                created_at: Utc::now(),
            })
            .unwrap();
        ctx.db().insert_group_key_pair(&first).unwrap();
        sync.update(&group, GroupKeysConfig::new, |config: &mut GroupKeysConfig, _| {
            config.add_key([1; 32], [2; 32], 1_000);
        })
        .await
        .unwrap();

        // A rotation snapshot sealed under the current key.
        let mut remote = GroupKeysConfig::new();
        remote.add_key([1; 32], [2; 32], 1_000);
        remote.add_key([3; 32], [4; 32], 2_000);
        let pending = remote.push(2_000).unwrap();
        let payload = ConfigMessage::seal(
            ConfigNamespace::GroupKeys,
            pending.seqno,
            &pending.data,
            &[2; 32],
            2_000,
        )
        .unwrap()
        .to_bytes()
        .unwrap();

        let outcome = sync
            .apply_incoming(&group, ConfigNamespace::GroupKeys, &[payload])
            .await
            .unwrap();
        match outcome {
            Some(MergeOutcome::GroupKeys { added, .. }) => assert_eq!(added, vec![[3; 32]]),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let pairs = ctx.db().list_group_key_pairs(&group).unwrap();
        assert_eq!(pairs.len(), 2);
    }
}
