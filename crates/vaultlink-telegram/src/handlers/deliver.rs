use std::time::Duration;

use teloxide::prelude::*;

use vaultlink_core::{
    domain::{ChatId, UserId},
    formatting::{escape_html, format_auto_delete_notice, format_duration, format_join_prompt},
    links::resolve,
    security::{is_operator, RateDecision},
};

use crate::{router::AppState, send_html};

const UNAVAILABLE: &str = "This link is unavailable.";

/// `/start [payload]` from any user.
pub(super) async fn handle_start(bot: &Bot, state: &AppState, user: UserId, chat: ChatId, payload: &str) {
    match state.store.add_user(user) {
        Ok(true) => tracing::info!(user = user.0, "new user"),
        Ok(false) => {}
        Err(e) => tracing::warn!(user = user.0, "recording user failed: {e}"),
    }

    let payload = payload.trim();
    if payload.is_empty() {
        send_html(bot, chat, &escape_html(&state.cfg.start_message)).await;
        return;
    }

    let decision = state.rate_limiter.lock().await.check(user);
    if let RateDecision::Limited { retry_after } = decision {
        let wait = format_duration(retry_after.max(Duration::from_secs(1)));
        send_html(bot, chat, &format!("Too many requests. Try again in {wait}.")).await;
        return;
    }

    let operator = is_operator(Some(user), &state.cfg.operator_ids);
    if !operator && !state.gate.is_cleared(user).await {
        send_html(bot, chat, &format_join_prompt(&state.gate.join_links())).await;
        return;
    }

    let plan = match resolve(state.codec(), state.store.as_ref(), payload) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::debug!(user = user.0, "token rejected: {e}");
            send_html(bot, chat, UNAVAILABLE).await;
            return;
        }
    };

    let report = {
        let _guard = state.chat_locks.lock_chat(chat.0).await;
        state.dispatch.deliver_plan(&plan, chat).await
    };
    // The notice may have gone out even when every item failed.
    if let Some(delay) = state.cfg.auto_delete {
        state.autodelete.register_report(chat, &report, delay).await;
    }
    if report.is_empty() {
        send_html(bot, chat, UNAVAILABLE).await;
        return;
    }
    if let Some(delay) = state.cfg.auto_delete {
        send_html(bot, chat, &format_auto_delete_notice(delay)).await;
    }
}
