//! Short-lived display items (reactions, call-to-action banners).
//!
//! Every item gets its own identity and its own expiry timer, so removing one
//! never disturbs items added around the same time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct TransientItem<T> {
    pub id: u64,
    pub value: T,
}

type ExpiryHook = Arc<dyn Fn(u64) + Send + Sync>;

pub struct TransientFeed<T> {
    items: Arc<Mutex<Vec<TransientItem<T>>>>,
    next_id: AtomicU64,
    lifetime: Duration,
    cancel: CancellationToken,
    on_expire: Option<ExpiryHook>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> TransientFeed<T>
where
    T: Clone + Send + 'static,
{
    /// Items live for `lifetime`; pending timers stop when `cancel` fires.
    pub fn new(lifetime: Duration, cancel: CancellationToken) -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            lifetime,
            cancel,
            on_expire: None,
        }
    }

    /// Calls `hook` with the id of each item as it expires.
    pub fn on_expire(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_expire = Some(Arc::new(hook));
        self
    }

    /// Adds `value` now and schedules its removal. Returns the item id.
    pub fn push(&self, value: T) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.items).push(TransientItem { id, value });

        let items = Arc::clone(&self.items);
        let cancel = self.cancel.clone();
        let hook = self.on_expire.clone();
        let lifetime = self.lifetime;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(lifetime) => {
                    let removed = {
                        let mut items = lock(&items);
                        let before = items.len();
                        items.retain(|item| item.id != id);
                        items.len() != before
                    };
                    if removed {
                        debug!(id, "Transient item expired");
                        if let Some(hook) = hook {
                            hook(id);
                        }
                    }
                }
            }
        });
        id
    }

    pub fn items(&self) -> Vec<TransientItem<T>> {
        lock(&self.items).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.items).clear();
    }
}
