use std::sync::Arc;

use teloxide::prelude::*;

use vaultlink_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    formatting::{escape_html, format_broadcast_report, format_progress},
};

use crate::{router::AppState, send_html};

/// `/broadcast`, sent as a reply to the message to fan out.
pub(super) async fn start_broadcast(bot: &Bot, state: &Arc<AppState>, op: UserId, msg: &Message) {
    let chat = ChatId(msg.chat.id.0);
    let Some(source) = msg.reply_to_message() else {
        send_html(bot, chat, "Reply to the message you want to broadcast with /broadcast.").await;
        return;
    };
    let source = MessageRef::new(ChatId(source.chat.id.0), MessageId(source.id.0));

    let recipients: Vec<ChatId> = state.store.users().into_iter().map(ChatId::from).collect();
    if recipients.is_empty() {
        send_html(bot, chat, "No users to broadcast to yet.").await;
        return;
    }

    let slot = match state.registry.begin_broadcast(op, recipients.len()) {
        Ok(slot) => slot,
        Err(e) => {
            send_html(bot, chat, &escape_html(&e.operator_message())).await;
            return;
        }
    };

    send_html(
        bot,
        chat,
        &format!("Broadcasting to {} users. Check with /progress.", recipients.len()),
    )
    .await;
    tracing::info!(operator = op.0, total = recipients.len(), "broadcast started");

    let bot = bot.clone();
    let state = state.clone();
    tokio::spawn(async move {
        let report = state
            .dispatch
            .broadcast_item(source, &recipients, slot.progress())
            .await;

        let mut pruned = 0usize;
        for rejected in &report.rejected {
            match state.store.remove_user(UserId(rejected.0)) {
                Ok(true) => pruned += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(user = rejected.0, "removing user failed: {e}"),
            }
        }

        drop(slot);
        send_html(&bot, chat, &format_broadcast_report(&report, pruned)).await;
    });
}

pub(super) async fn show_progress(bot: &Bot, state: &AppState, op: UserId, chat: ChatId) {
    let html = match state.registry.broadcast_progress(op) {
        Some(p) => format_progress(&p),
        None => "No broadcast is running.".to_string(),
    };
    send_html(bot, chat, &html).await;
}
