use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    plan::ItemRef,
    ports::{ContentTransfer, TransferResult},
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* outbound transfers (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between transfers into the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// `ContentTransfer` decorator that paces outbound calls.
///
/// Best-effort defense against flood-control errors during large batches and
/// broadcasts. The dispatch engine still handles the `Throttled` errors that
/// get through.
pub struct ThrottledTransfer {
    inner: Arc<dyn ContentTransfer>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledTransfer {
    pub fn new(inner: Arc<dyn ContentTransfer>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    /// Forget the limiters of chats that are not mid-call and whose next slot
    /// is already open. Returns how many were dropped.
    pub async fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let mut map = self.per_chat.lock().await;
        let before = map.len();
        map.retain(|_, lim| {
            if Arc::strong_count(lim) > 1 {
                return true;
            }
            lim.try_lock().map_or(true, |l| l.next > now)
        });
        before - map.len()
    }

    async fn throttle_chat(&self, chat_id: i64) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl ContentTransfer for ThrottledTransfer {
    async fn transfer_item(&self, item: ItemRef, recipient: ChatId) -> TransferResult<MessageRef> {
        self.throttle_chat(recipient.0).await;
        self.inner.transfer_item(item, recipient).await
    }

    async fn copy_message(
        &self,
        source: MessageRef,
        recipient: ChatId,
    ) -> TransferResult<MessageRef> {
        self.throttle_chat(recipient.0).await;
        self.inner.copy_message(source, recipient).await
    }

    async fn send_notice(&self, recipient: ChatId, text: &str) -> TransferResult<MessageRef> {
        self.throttle_chat(recipient.0).await;
        self.inner.send_notice(recipient, text).await
    }
}
