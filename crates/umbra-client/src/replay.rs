//! Subscribe-once, replay-last-value fetch sharing.
//!
//! Several callers may need the result of one network fetch (for example
//! the one-time display-name lookup right after restoring an account).
//! [`SharedFetch`] runs the fetch once; concurrent callers await the same
//! in-flight result, later callers get the cached value, and a failed fetch
//! resets to idle so the next caller retries.

use tokio::sync::{watch, Mutex};

enum FetchState<T> {
    Idle,
    InFlight(watch::Receiver<Option<T>>),
    Ready(T),
}

pub struct SharedFetch<T> {
    state: Mutex<FetchState<T>>,
}

impl<T: Clone> Default for SharedFetch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SharedFetch<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FetchState::Idle),
        }
    }

    /// Return the cached value, or run `fetch` if nobody has yet.
    ///
    /// Exactly one fetch runs at a time; everyone else waits on it. An
    /// error is returned only to the caller that ran the fetch — waiters
    /// loop and the next one retries.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        loop {
            let mut rx = {
                let mut state = self.state.lock().await;
                match &*state {
                    FetchState::Ready(value) => return Ok(value.clone()),
                    FetchState::InFlight(rx) => rx.clone(),
                    FetchState::Idle => {
                        let (tx, rx) = watch::channel(None);
                        *state = FetchState::InFlight(rx);
                        drop(state);

                        match fetch().await {
                            Ok(value) => {
                                *self.state.lock().await = FetchState::Ready(value.clone());
                                let _ = tx.send(Some(value.clone()));
                                return Ok(value);
                            }
                            Err(e) => {
                                // Dropping tx wakes the waiters; they will
                                // observe Idle and take over.
                                *self.state.lock().await = FetchState::Idle;
                                return Err(e);
                            }
                        }
                    }
                }
            };

            while rx.changed().await.is_ok() {
                if let Some(value) = rx.borrow().clone() {
                    return Ok(value);
                }
            }
            // Sender dropped without a value: the fetch failed. Loop and
            // contend for the fetch ourselves.
        }
    }

    /// The cached value, if a fetch already completed.
    pub async fn peek(&self) -> Option<T> {
        match &*self.state.lock().await {
            FetchState::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }
}
