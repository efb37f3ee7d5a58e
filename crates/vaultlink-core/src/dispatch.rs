//! Delivery of plans to one recipient, and fan-out of one message to many.
//!
//! Both paths share the throttling rule: on `Throttled { wait }` sleep exactly
//! `wait`, retry the same transfer once, and count a second failure of any
//! kind against that item/recipient. Nothing here aborts the remaining work.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::time::sleep;

use crate::{
    domain::{ChatId, MessageRef},
    plan::DeliveryPlan,
    ports::{ContentTransfer, TransferError, TransferResult},
};

const MAX_RETRIES: usize = 1;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handles of delivered items, in plan order.
    pub delivered: Vec<MessageRef>,
    /// Handle of the annotation message, if the plan had one and it was sent.
    pub notice: Option<MessageRef>,
    pub failed_count: usize,
}

impl DeliveryReport {
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Recipients that permanently refused delivery (subset of `failed`).
    pub rejected: Vec<ChatId>,
}

/// Live counters of one broadcast, readable while it runs.
#[derive(Debug, Default)]
pub struct BroadcastProgress {
    total: AtomicUsize,
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BroadcastProgress {
    pub fn new(total: usize) -> Self {
        let p = Self::default();
        p.total.store(total, Ordering::Relaxed);
        p
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, processed: usize, succeeded: usize, failed: usize) {
        self.succeeded.store(succeeded, Ordering::Relaxed);
        self.failed.store(failed, Ordering::Relaxed);
        self.processed.store(processed, Ordering::Relaxed);
    }
}

/// Per-invocation bookkeeping of `deliver_plan`.
#[derive(Debug)]
struct DispatchJob {
    recipient: ChatId,
    attempted: usize,
    succeeded: usize,
    failed: usize,
}

#[derive(Clone)]
pub struct DispatchEngine {
    transfer: Arc<dyn ContentTransfer>,
    progress_every: usize,
}

impl DispatchEngine {
    pub fn new(transfer: Arc<dyn ContentTransfer>, progress_every: usize) -> Self {
        Self {
            transfer,
            progress_every: progress_every.max(1),
        }
    }

    /// Deliver every item of `plan` to `recipient`, strictly in plan order.
    pub async fn deliver_plan(&self, plan: &DeliveryPlan, recipient: ChatId) -> DeliveryReport {
        let mut job = DispatchJob {
            recipient,
            attempted: 0,
            succeeded: 0,
            failed: 0,
        };
        let mut report = DeliveryReport::default();

        if let Some(message) = plan.message() {
            match self
                .with_retry(|| self.transfer.send_notice(recipient, message))
                .await
            {
                Ok(handle) => report.notice = Some(handle),
                Err(e) => tracing::warn!(recipient = recipient.0, "annotation not sent: {e}"),
            }
        }

        for item in plan.expand() {
            job.attempted += 1;
            match self
                .with_retry(|| self.transfer.transfer_item(item, recipient))
                .await
            {
                Ok(handle) => {
                    job.succeeded += 1;
                    report.delivered.push(handle);
                }
                Err(e) => {
                    job.failed += 1;
                    tracing::warn!(
                        recipient = recipient.0,
                        sequence = item.sequence,
                        "item not delivered: {e}"
                    );
                }
            }
        }

        report.failed_count = job.failed;
        tracing::info!(
            recipient = job.recipient.0,
            attempted = job.attempted,
            succeeded = job.succeeded,
            failed = job.failed,
            "delivery finished"
        );
        report
    }

    /// Copy `source` to every recipient, in input order.
    pub async fn broadcast_item(
        &self,
        source: MessageRef,
        recipients: &[ChatId],
        progress: &BroadcastProgress,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (idx, &recipient) in recipients.iter().enumerate() {
            match self
                .with_retry(|| self.transfer.copy_message(source, recipient))
                .await
            {
                Ok(_) => report.succeeded += 1,
                Err(TransferError::Rejected(reason)) => {
                    tracing::debug!(recipient = recipient.0, "recipient rejected broadcast: {reason}");
                    report.failed += 1;
                    report.rejected.push(recipient);
                }
                Err(e) => {
                    tracing::warn!(recipient = recipient.0, "broadcast copy failed: {e}");
                    report.failed += 1;
                }
            }

            let processed = idx + 1;
            if processed % self.progress_every == 0 {
                progress.publish(processed, report.succeeded, report.failed);
            }
        }

        progress.publish(recipients.len(), report.succeeded, report.failed);
        tracing::info!(
            total = recipients.len(),
            succeeded = report.succeeded,
            failed = report.failed,
            rejected = report.rejected.len(),
            "broadcast finished"
        );
        report
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> TransferResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = TransferResult<T>>,
    {
        let mut attempts = 0usize;
        loop {
            match op().await {
                Err(TransferError::Throttled { wait }) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}
