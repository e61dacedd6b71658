//! Shared client context injected into every subsystem.
//!
//! Holds the identity, the database handle, the transport backend, and the
//! event/notification channels. There are no process-wide singletons: the
//! poller, sync engine, pipeline, job runner, and group manager each get an
//! `Arc<ClientContext>` and own the rest of their state themselves.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

use umbra_net::{Backend, CommunityClient, SnodeClient};
use umbra_shared::{AccountId, Identity};
use umbra_store::Database;

use crate::config::ClientConfig;
use crate::events::{ClientEvent, Notifier};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything the subsystems share.
pub struct ClientContext {
    identity: Identity,
    /// Single writer connection. Reads share it too: CRUD calls are short
    /// and the guard is never held across an await.
    db: Mutex<Database>,
    backend: Arc<dyn Backend>,
    config: ClientConfig,
    events: broadcast::Sender<ClientEvent>,
    notifier: Arc<dyn Notifier>,
}

impl ClientContext {
    pub fn new(
        identity: Identity,
        db: Database,
        backend: Arc<dyn Backend>,
        config: ClientConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            identity,
            db: Mutex::new(db),
            backend,
            config,
            events,
            notifier,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn account_id(&self) -> AccountId {
        self.identity.account_id()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Lock the database. Do not hold the guard across an await point.
    pub fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Client for the configured swarm storage node.
    pub fn snode(&self) -> SnodeClient {
        SnodeClient::new(self.backend.clone(), self.config.swarm_url.clone())
    }

    /// Client for one community server.
    pub fn community(&self, server_url: &str, server_pubkey: [u8; 32]) -> CommunityClient {
        CommunityClient::new(self.backend.clone(), server_url, server_pubkey)
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event. Dropped when nobody is listening.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let (ctx, _) = testing::context();
        let mut rx = ctx.subscribe_events();

        ctx.emit(ClientEvent::ProfileUpdated);
        match rx.recv().await.unwrap() {
            ClientEvent::ProfileUpdated => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
