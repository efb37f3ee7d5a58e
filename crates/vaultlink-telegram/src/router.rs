use std::{collections::HashMap, sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};

use vaultlink_core::{
    autodelete::AutoDeleteScheduler,
    config::Config,
    dispatch::DispatchEngine,
    ports::{ContentTransfer, ItemDeleter, RecipientGate, Store},
    registry::SessionRegistry,
    security::RateLimiter,
    store::JsonFileStore,
    throttle::{ThrottleConfig, ThrottledTransfer},
    token::TokenCodec,
};

use crate::handlers;
use crate::TelegramPorts;

const PRUNE_EVERY: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub bot_username: String,
    pub registry: Arc<SessionRegistry>,
    pub dispatch: DispatchEngine,
    pub autodelete: Arc<AutoDeleteScheduler>,
    pub store: Arc<dyn Store>,
    pub gate: Arc<dyn RecipientGate>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub chat_locks: Arc<ChatLocks>,
}

impl AppState {
    pub fn codec(&self) -> &TokenCodec {
        self.registry.codec()
    }
}

/// Serialises deliveries into the same chat.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the locks no delivery holds or waits on. Returns how many went.
    pub async fn prune(&self) -> usize {
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let me = bot.get_me().await?;
    let bot_username = me.username().to_string();
    tracing::info!(
        bot = %bot_username,
        archive = cfg.archive_channel.0,
        operators = cfg.operator_ids.len(),
        force_sub = cfg.force_sub_channels.len(),
        "vaultlink started"
    );

    let mut ports = TelegramPorts::new(
        bot.clone(),
        cfg.protect_content,
        cfg.force_sub_channels.clone(),
    );
    ports.load_join_links().await;
    let ports = Arc::new(ports);

    // Pace outbound copies to stay under flood control during batches and
    // broadcasts. The dispatch engine still retries the RetryAfter errors
    // that get through.
    let raw: Arc<dyn ContentTransfer> = ports.clone();
    let throttle = Arc::new(ThrottledTransfer::new(raw, ThrottleConfig::default()));
    let transfer: Arc<dyn ContentTransfer> = throttle.clone();

    let deleter: Arc<dyn ItemDeleter> = ports.clone();
    let gate: Arc<dyn RecipientGate> = ports;
    let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(&cfg.data_file)?);

    let chat_locks = Arc::new(ChatLocks::default());
    let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
        cfg.rate_limit_enabled,
        cfg.rate_limit_requests,
        cfg.rate_limit_window,
    )));

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        bot_username,
        registry: Arc::new(SessionRegistry::new(
            TokenCodec::new(cfg.archive_channel),
            cfg.collect_limits,
        )),
        dispatch: DispatchEngine::new(transfer, cfg.broadcast_progress_every),
        autodelete: Arc::new(AutoDeleteScheduler::new(deleter)),
        store,
        gate,
        rate_limiter: rate_limiter.clone(),
        chat_locks: chat_locks.clone(),
    });

    let pruner = tokio::spawn(async move {
        let mut tick = tokio::time::interval(PRUNE_EVERY);
        loop {
            tick.tick().await;
            let buckets = rate_limiter.lock().await.prune(Instant::now().into_std());
            let locks = chat_locks.prune().await;
            let limiters = throttle.prune_idle().await;
            if buckets + locks + limiters > 0 {
                tracing::debug!(buckets, locks, limiters, "idle per-chat state pruned");
            }
        }
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    pruner.abort();
    let cancelled = state.autodelete.shutdown().await;
    tracing::info!(cancelled, "vaultlink stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prune_keeps_held_chat_locks() {
        let locks = ChatLocks::default();
        let held = locks.lock_chat(1).await;
        drop(locks.lock_chat(2).await);

        assert_eq!(locks.prune().await, 1);
        assert_eq!(locks.inner.lock().await.len(), 1);

        drop(held);
        assert_eq!(locks.prune().await, 1);
        assert!(locks.inner.lock().await.is_empty());
    }
}
