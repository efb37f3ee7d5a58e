//! Process-wide table of live collection sessions and running broadcasts.
//!
//! One session per operator. The outer map lock is held only for lookup,
//! insert and remove; each session is mutated under its own lock, so events
//! of one operator serialise while different operators never wait on each
//! other.
//!
//! Starting a new session while one is live replaces it. The replaced mode is
//! reported back so the caller can tell the operator what was discarded.
//!
//! A broadcast slot is held by a [`BroadcastSlot`] guard and freed when the
//! guard drops, including when the task owning it panics.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard},
};

use tokio::sync::Mutex;

use crate::{
    collection::{CollectLimits, CollectMode, CollectionSession, Step},
    dispatch::{BroadcastProgress, ProgressSnapshot},
    domain::UserId,
    errors::Error,
    plan::ItemRef,
    token::TokenCodec,
    Result,
};

type SessionSlot = Arc<Mutex<CollectionSession>>;
type BroadcastMap = Arc<StdMutex<HashMap<UserId, Arc<BroadcastProgress>>>>;

fn lock_broadcasts(map: &BroadcastMap) -> StdMutexGuard<'_, HashMap<UserId, Arc<BroadcastProgress>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Started {
    pub step: Step,
    pub replaced: Option<CollectMode>,
}

pub struct SessionRegistry {
    codec: TokenCodec,
    limits: CollectLimits,
    sessions: Mutex<HashMap<UserId, SessionSlot>>,
    broadcasts: BroadcastMap,
}

/// An operator's claim on the broadcast slot. Dropping it frees the slot.
pub struct BroadcastSlot {
    operator: UserId,
    progress: Arc<BroadcastProgress>,
    broadcasts: BroadcastMap,
}

impl BroadcastSlot {
    pub fn progress(&self) -> &Arc<BroadcastProgress> {
        &self.progress
    }
}

impl Drop for BroadcastSlot {
    fn drop(&mut self) {
        let mut map = lock_broadcasts(&self.broadcasts);
        if map
            .get(&self.operator)
            .is_some_and(|p| Arc::ptr_eq(p, &self.progress))
        {
            map.remove(&self.operator);
        }
    }
}

impl SessionRegistry {
    pub fn new(codec: TokenCodec, limits: CollectLimits) -> Self {
        Self {
            codec,
            limits,
            sessions: Mutex::new(HashMap::new()),
            broadcasts: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn start(&self, operator: UserId, mode: CollectMode) -> Result<Started> {
        let mut session = CollectionSession::new(mode, self.codec, self.limits);
        let step = session.start()?;

        let previous = {
            let mut map = self.sessions.lock().await;
            map.insert(operator, Arc::new(Mutex::new(session)))
        };

        let replaced = match previous {
            Some(slot) => {
                let mut old = slot.lock().await;
                let mode = old.mode();
                old.cancel();
                tracing::info!(operator = operator.0, mode = mode.label(), "session replaced");
                Some(mode)
            }
            None => None,
        };

        Ok(Started { step, replaced })
    }

    pub async fn active_mode(&self, operator: UserId) -> Option<CollectMode> {
        let slot = self.slot(operator).await?;
        let session = slot.lock().await;
        Some(session.mode())
    }

    pub async fn offer_item(&self, operator: UserId, item: ItemRef) -> Result<Step> {
        self.with_session(operator, |s| s.offer_item(item)).await
    }

    pub async fn offer_text(&self, operator: UserId, text: &str) -> Result<Step> {
        self.with_session(operator, |s| s.offer_text(text)).await
    }

    pub async fn done(&self, operator: UserId) -> Result<Step> {
        self.with_session(operator, |s| s.done()).await
    }

    pub async fn cancel(&self, operator: UserId) -> Result<Step> {
        self.with_session(operator, |s| Ok(s.cancel())).await
    }

    /// Claim the operator's broadcast slot until the returned guard drops.
    pub fn begin_broadcast(&self, operator: UserId, total: usize) -> Result<BroadcastSlot> {
        let mut map = lock_broadcasts(&self.broadcasts);
        if map.contains_key(&operator) {
            return Err(Error::BroadcastInProgress);
        }
        let progress = Arc::new(BroadcastProgress::new(total));
        map.insert(operator, progress.clone());
        Ok(BroadcastSlot {
            operator,
            progress,
            broadcasts: self.broadcasts.clone(),
        })
    }

    pub fn broadcast_progress(&self, operator: UserId) -> Option<ProgressSnapshot> {
        lock_broadcasts(&self.broadcasts)
            .get(&operator)
            .map(|p| p.snapshot())
    }

    async fn slot(&self, operator: UserId) -> Option<SessionSlot> {
        self.sessions.lock().await.get(&operator).cloned()
    }

    /// Run one transition on the operator's session. A session that reaches a
    /// terminal state releases its slot.
    async fn with_session<F>(&self, operator: UserId, op: F) -> Result<Step>
    where
        F: FnOnce(&mut CollectionSession) -> Result<Step>,
    {
        let slot = self.slot(operator).await.ok_or(Error::NoActiveSession)?;
        let mut session = slot.lock().await;
        if session.state().is_terminal() {
            // Replaced while we waited for the lock.
            return Err(Error::NoActiveSession);
        }

        let step = op(&mut *session)?;
        if session.state().is_terminal() {
            let mut map = self.sessions.lock().await;
            if map.get(&operator).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                map.remove(&operator);
            }
        }
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::ChatId, plan::DeliveryPlan};

    const X: ChatId = ChatId(-1001234567890);

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            TokenCodec::new(X),
            CollectLimits {
                max_items: 10,
                max_range: 100,
            },
        )
    }

    fn item(seq: i32) -> ItemRef {
        ItemRef::new(X, seq)
    }

    #[tokio::test]
    async fn finalized_session_releases_its_slot() {
        let reg = registry();
        let op = UserId(1);
        reg.start(op, CollectMode::Range).await.unwrap();
        reg.offer_item(op, item(100)).await.unwrap();
        let step = reg.offer_item(op, item(103)).await.unwrap();

        let Step::Finalized(out) = step else {
            panic!("expected finalized");
        };
        assert_eq!(
            reg.codec().decode(&out.token).unwrap(),
            DeliveryPlan::range(item(100), item(103)).unwrap()
        );
        assert_eq!(reg.active_mode(op).await, None);
        assert!(matches!(
            reg.offer_item(op, item(1)).await,
            Err(Error::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn new_start_replaces_the_live_session() {
        let reg = registry();
        let op = UserId(1);
        reg.start(op, CollectMode::List).await.unwrap();
        reg.offer_item(op, item(5)).await.unwrap();

        let started = reg.start(op, CollectMode::Range).await.unwrap();
        assert_eq!(started.replaced, Some(CollectMode::List));
        assert_eq!(started.step, Step::AwaitingFirst);
        assert_eq!(reg.active_mode(op).await, Some(CollectMode::Range));
    }

    #[tokio::test]
    async fn cancel_releases_slot_and_operators_are_independent() {
        let reg = registry();
        reg.start(UserId(1), CollectMode::List).await.unwrap();
        reg.start(UserId(2), CollectMode::List).await.unwrap();

        assert_eq!(reg.cancel(UserId(1)).await.unwrap(), Step::Cancelled);
        assert_eq!(reg.active_mode(UserId(1)).await, None);
        assert_eq!(reg.active_mode(UserId(2)).await, Some(CollectMode::List));
        assert!(matches!(
            reg.cancel(UserId(1)).await,
            Err(Error::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn failed_step_keeps_the_session() {
        let reg = registry();
        let op = UserId(1);
        reg.start(op, CollectMode::List).await.unwrap();
        assert!(matches!(reg.done(op).await, Err(Error::EmptyCollection)));
        assert_eq!(reg.active_mode(op).await, Some(CollectMode::List));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_closing_items_finalize_once() {
        let reg = Arc::new(registry());
        let op = UserId(1);
        reg.start(op, CollectMode::Range).await.unwrap();
        reg.offer_item(op, item(100)).await.unwrap();

        let a = tokio::spawn({
            let reg = reg.clone();
            async move { reg.offer_item(op, item(103)).await }
        });
        let b = tokio::spawn({
            let reg = reg.clone();
            async move { reg.offer_item(op, item(104)).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let finalized = results
            .iter()
            .filter(|r| matches!(r, Ok(Step::Finalized(_))))
            .count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(Error::NoActiveSession)))
            .count();
        assert_eq!((finalized, rejected), (1, 1));
        assert_eq!(reg.active_mode(op).await, None);
    }

    #[test]
    fn one_broadcast_per_operator() {
        let reg = registry();
        let op = UserId(1);
        let slot = reg.begin_broadcast(op, 5).unwrap();
        assert!(matches!(
            reg.begin_broadcast(op, 5),
            Err(Error::BroadcastInProgress)
        ));
        let other = reg.begin_broadcast(UserId(2), 1);
        assert!(other.is_ok());
        assert_eq!(slot.progress().snapshot().total, 5);
        assert_eq!(reg.broadcast_progress(op).map(|p| p.total), Some(5));

        drop(slot);
        assert!(reg.broadcast_progress(op).is_none());
        assert!(reg.begin_broadcast(op, 1).is_ok());
        assert_eq!(reg.broadcast_progress(UserId(2)).map(|p| p.total), Some(1));
    }

    #[tokio::test]
    async fn panicking_broadcast_frees_its_slot() {
        let reg = registry();
        let op = UserId(1);
        let slot = reg.begin_broadcast(op, 3).unwrap();

        let task = tokio::spawn(async move {
            let _slot = slot;
            panic!("transfer blew up");
        });
        assert!(task.await.is_err());

        assert!(reg.broadcast_progress(op).is_none());
        assert!(reg.begin_broadcast(op, 1).is_ok());
    }
}
