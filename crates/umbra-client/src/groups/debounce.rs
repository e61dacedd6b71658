//! Aggregation of group-operation failures into one notification.
//!
//! Inviting ten members can fail ten times within a second. Each failure is
//! recorded here, and one flush after a quiet window produces a single
//! notification per group instead of a toast storm.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::debug;

use umbra_shared::AccountId;

use crate::events::{Notifier, UserNotification};

pub struct FailureDebouncer {
    window: Duration,
    notifier: Arc<dyn Notifier>,
    pending: std::sync::Mutex<HashMap<AccountId, Vec<AccountId>>>,
    flush_scheduled: AtomicBool,
    me: Weak<FailureDebouncer>,
}

impl FailureDebouncer {
    pub fn new(window: Duration, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            window,
            notifier,
            pending: std::sync::Mutex::new(HashMap::new()),
            flush_scheduled: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    /// Record one failed member operation. The first record of a burst
    /// schedules the flush; the rest just accumulate.
    pub fn record(&self, group: AccountId, member: AccountId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(group)
            .or_default()
            .push(member);

        if self.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(debouncer) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(debouncer.window).await;
            debouncer.flush();
        });
    }

    fn flush(&self) {
        let pending = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()),
        );
        self.flush_scheduled.store(false, Ordering::SeqCst);

        for (group, members) in pending {
            debug!(group = %group.short(), failed = members.len(), "Flushing group failure burst");
            self.notifier
                .notify(UserNotification::GroupOperationFailed { group, members });
        }
    }
}
