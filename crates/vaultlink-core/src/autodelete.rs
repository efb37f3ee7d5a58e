//! Per-recipient auto-delete of delivered items.
//!
//! Every ticket owns an explicit cancellation token and task handle in the
//! scheduler's table, so shutdown can cancel all outstanding timers instead
//! of leaving them to process exit. The table lock is never held across a
//! call into the deleter.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    dispatch::DeliveryReport,
    domain::{ChatId, MessageRef},
    ports::{DeleteOutcome, ItemDeleter},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u64);

#[derive(Clone, Debug)]
pub struct DeleteTicket {
    pub recipient: ChatId,
    pub handle: MessageRef,
    pub delivered_at: DateTime<Utc>,
    pub delay: Duration,
}

struct TicketEntry {
    ticket: DeleteTicket,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TicketEntry {
    fn disarm(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct AutoDeleteScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    deleter: Arc<dyn ItemDeleter>,
    next_id: AtomicU64,
    tickets: Mutex<HashMap<ChatId, HashMap<TicketId, TicketEntry>>>,
}

impl AutoDeleteScheduler {
    pub fn new(deleter: Arc<dyn ItemDeleter>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                deleter,
                next_id: AtomicU64::new(1),
                tickets: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Record a ticket for `handle` and arm its timer.
    pub async fn register(&self, recipient: ChatId, handle: MessageRef, delay: Duration) -> TicketId {
        let id = TicketId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();

        // Insert under the lock so an immediately-firing timer finds its entry.
        let mut tickets = self.inner.tickets.lock().await;
        let scheduler = self.clone();
        let cancel_for_task = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
              _ = cancel_for_task.cancelled() => {}
              _ = sleep(delay) => scheduler.on_expire(recipient, id).await,
            }
        });

        tickets.entry(recipient).or_default().insert(
            id,
            TicketEntry {
                ticket: DeleteTicket {
                    recipient,
                    handle,
                    delivered_at: Utc::now(),
                    delay,
                },
                cancel,
                task,
            },
        );
        id
    }

    /// Arm a ticket for every message a delivery left in the chat: the
    /// annotation notice, if sent, and each delivered item.
    pub async fn register_report(&self, recipient: ChatId, report: &DeliveryReport, delay: Duration) -> usize {
        let mut n = 0;
        for handle in report.notice.iter().chain(report.delivered.iter()) {
            self.register(recipient, *handle, delay).await;
            n += 1;
        }
        n
    }

    /// Cancel one ticket; siblings for the same recipient keep running.
    pub async fn cancel(&self, recipient: ChatId, id: TicketId) -> bool {
        let entry = {
            let mut tickets = self.inner.tickets.lock().await;
            let Some(set) = tickets.get_mut(&recipient) else {
                return false;
            };
            let entry = set.remove(&id);
            if set.is_empty() {
                tickets.remove(&recipient);
            }
            entry
        };
        match entry {
            Some(e) => {
                e.disarm();
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding ticket of `recipient` without deleting anything.
    pub async fn cancel_all(&self, recipient: ChatId) -> usize {
        let set = self.inner.tickets.lock().await.remove(&recipient);
        let Some(set) = set else {
            return 0;
        };
        let n = set.len();
        for (_, entry) in set {
            entry.disarm();
        }
        n
    }

    /// Cancel all tickets of all recipients. Used on process teardown.
    pub async fn shutdown(&self) -> usize {
        let all = std::mem::take(&mut *self.inner.tickets.lock().await);
        let mut n = 0usize;
        for (_, set) in all {
            for (_, entry) in set {
                entry.disarm();
                n += 1;
            }
        }
        if n > 0 {
            tracing::info!(cancelled = n, "auto-delete timers cancelled");
        }
        n
    }

    pub async fn pending(&self, recipient: ChatId) -> usize {
        self.inner
            .tickets
            .lock()
            .await
            .get(&recipient)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub async fn tickets(&self, recipient: ChatId) -> Vec<DeleteTicket> {
        let tickets = self.inner.tickets.lock().await;
        let Some(set) = tickets.get(&recipient) else {
            return Vec::new();
        };
        let mut out: Vec<(TicketId, DeleteTicket)> = set
            .iter()
            .map(|(id, e)| (*id, e.ticket.clone()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out.into_iter().map(|(_, t)| t).collect()
    }

    async fn on_expire(&self, recipient: ChatId, id: TicketId) {
        // Remove first: a ticket that is gone was cancelled and must not delete.
        let entry = {
            let mut tickets = self.inner.tickets.lock().await;
            let Some(set) = tickets.get_mut(&recipient) else {
                return;
            };
            let entry = set.remove(&id);
            if set.is_empty() {
                tickets.remove(&recipient);
            }
            entry
        };
        let Some(entry) = entry else {
            return;
        };

        let handle = entry.ticket.handle;
        match self.inner.deleter.delete_item(handle).await {
            Ok(DeleteOutcome::Deleted) => {
                tracing::debug!(
                    recipient = recipient.0,
                    message_id = handle.message_id.0,
                    "delivered item deleted"
                );
            }
            Ok(DeleteOutcome::NotFound) => {
                tracing::debug!(
                    recipient = recipient.0,
                    message_id = handle.message_id.0,
                    "delivered item already gone"
                );
            }
            Err(e) => {
                tracing::warn!(
                    recipient = recipient.0,
                    message_id = handle.message_id.0,
                    "auto-delete failed: {e}"
                );
            }
        }
    }
}
