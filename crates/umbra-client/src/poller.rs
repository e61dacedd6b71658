//! Adaptive polling of swarm and community targets.
//!
//! Each target owns a failure counter. A successful poll resets it; a
//! failure bumps it and the next interval backs off exponentially between
//! the configured bounds. Targets that keep failing and are not visible to
//! the user are pruned instead of retried forever.
//!
//! Loops are cancelled by a generation counter: `stop` bumps it, and every
//! loop re-checks its snapshot before and after sleeping. There is no task
//! handle bookkeeping and no way for a stale loop to outlive a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use umbra_net::ErrorClass;

use crate::error::Result;

/// Next poll interval for a target with `failure_count` consecutive
/// failures. Zero failures polls at exactly `min`; each failure doubles the
/// added backoff, capped at `max`.
pub fn backoff_interval(failure_count: u32, min: Duration, max: Duration) -> Duration {
    if failure_count == 0 {
        return min;
    }
    let backoff = 1u64.checked_shl(failure_count).unwrap_or(u64::MAX);
    let secs = min.as_secs().saturating_add(backoff);
    Duration::from_secs(secs).min(max)
}

/// One pollable target: the user's own swarm, a group swarm, or a community
/// server.
#[async_trait]
pub trait PollDriver: Send + Sync {
    /// Stable identifier, unique across the poller.
    fn key(&self) -> String;

    /// Fetch and process everything new for this target.
    async fn poll_once(&self) -> Result<()>;

    /// Re-fetch server capabilities after a blinding rejection. Only
    /// community targets do anything here.
    async fn refresh_capabilities(&self) -> Result<()> {
        Ok(())
    }

    /// Whether the user can currently see this target's conversation.
    /// Invisible targets are eligible for pruning.
    fn is_user_visible(&self) -> bool {
        true
    }

    /// Drop local state for a pruned target.
    fn prune(&self) -> Result<()> {
        Ok(())
    }
}

/// The outcome of one poll attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Polled,
    /// A previous poll of the same target is still running.
    SkippedInFlight,
    Failed,
    /// The target exceeded the failure threshold while invisible and has
    /// been dropped.
    Pruned,
    /// No such target.
    Removed,
}

struct TargetEntry {
    driver: Arc<dyn PollDriver>,
    failure_count: u32,
    in_flight: bool,
    loop_running: bool,
}

pub struct Poller {
    min_interval: Duration,
    max_interval: Duration,
    prune_threshold: u32,
    generation: AtomicU64,
    targets: Mutex<HashMap<String, TargetEntry>>,
    /// Handle to ourselves for spawning loops from `&self` methods.
    me: Weak<Poller>,
}

impl Poller {
    pub fn new(min_interval: Duration, max_interval: Duration, prune_threshold: u32) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            min_interval,
            max_interval,
            prune_threshold,
            generation: AtomicU64::new(0),
            targets: Mutex::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// Register a target and start its poll loop. Re-adding an existing key
    /// replaces the driver but keeps the failure counter.
    pub fn add_target(&self, driver: Arc<dyn PollDriver>) {
        let key = driver.key();
        let spawn = {
            let mut targets = self.lock_targets();
            match targets.get_mut(&key) {
                Some(entry) => {
                    entry.driver = driver;
                    if entry.loop_running {
                        false
                    } else {
                        entry.loop_running = true;
                        true
                    }
                }
                None => {
                    targets.insert(
                        key.clone(),
                        TargetEntry {
                            driver,
                            failure_count: 0,
                            in_flight: false,
                            loop_running: true,
                        },
                    );
                    true
                }
            }
        };
        if spawn {
            self.spawn_loop(key);
        }
    }

    pub fn remove_target(&self, key: &str) {
        self.lock_targets().remove(key);
    }

    pub fn target_count(&self) -> usize {
        self.lock_targets().len()
    }

    /// Stop every poll loop. Targets stay registered; `resume` restarts
    /// them.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for entry in self.lock_targets().values_mut() {
            entry.loop_running = false;
        }
        info!("Poller stopped");
    }

    /// Restart poll loops for all registered targets.
    pub fn resume(&self) {
        let keys: Vec<String> = {
            let mut targets = self.lock_targets();
            targets
                .iter_mut()
                .filter(|(_, e)| !e.loop_running)
                .map(|(k, e)| {
                    e.loop_running = true;
                    k.clone()
                })
                .collect()
        };
        for key in keys {
            self.spawn_loop(key);
        }
    }

    /// Poll one target immediately, with the same in-flight, capability
    /// retry, and prune handling the loop applies.
    pub async fn poll_target(&self, key: &str) -> PollResult {
        let driver = {
            let mut targets = self.lock_targets();
            let Some(entry) = targets.get_mut(key) else {
                return PollResult::Removed;
            };
            if entry.in_flight {
                debug!(target = key, "Skipping poll, previous one still in flight");
                return PollResult::SkippedInFlight;
            }
            entry.in_flight = true;
            entry.driver.clone()
        };

        let mut result = driver.poll_once().await;
        if is_blinding_required(&result) {
            // The server wants blinded ids: refresh capabilities once and
            // retry. A second rejection is a hard failure for this cycle.
            debug!(target = key, "Server requires blinded ids, refreshing capabilities");
            result = match driver.refresh_capabilities().await {
                Ok(()) => driver.poll_once().await,
                Err(e) => Err(e),
            };
        }

        let mut targets = self.lock_targets();
        let Some(entry) = targets.get_mut(key) else {
            return PollResult::Removed;
        };
        entry.in_flight = false;

        match result {
            Ok(()) => {
                entry.failure_count = 0;
                PollResult::Polled
            }
            Err(e) => {
                entry.failure_count += 1;
                warn!(
                    target = key,
                    failure_count = entry.failure_count,
                    error = %e,
                    "Poll failed"
                );
                if entry.failure_count > self.prune_threshold && !driver.is_user_visible() {
                    targets.remove(key);
                    drop(targets);
                    if let Err(e) = driver.prune() {
                        warn!(target = key, error = %e, "Failed to clean up pruned target");
                    }
                    info!(target = key, "Pruned persistently failing invisible target");
                    PollResult::Pruned
                } else {
                    PollResult::Failed
                }
            }
        }
    }

    pub fn failure_count(&self, key: &str) -> Option<u32> {
        self.lock_targets().get(key).map(|e| e.failure_count)
    }

    fn spawn_loop(&self, key: String) {
        let Some(poller) = self.me.upgrade() else {
            return;
        };
        let generation = self.generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                if poller.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                let started = Instant::now();
                let result = poller.poll_target(&key).await;
                if matches!(result, PollResult::Pruned | PollResult::Removed) {
                    break;
                }

                let failure_count = poller.failure_count(&key).unwrap_or(0);
                let interval =
                    backoff_interval(failure_count, poller.min_interval, poller.max_interval);
                // Time spent polling counts against the interval.
                tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;

                if poller.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
            }
            debug!(target = %key, "Poll loop exited");
        });
    }

    fn lock_targets(&self) -> std::sync::MutexGuard<'_, HashMap<String, TargetEntry>> {
        self.targets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn is_blinding_required(result: &Result<()>) -> bool {
    matches!(result, Err(e) if e.classify() == ErrorClass::BlindingRequired)
}
