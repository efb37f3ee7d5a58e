//! Telegram update handlers.
//!
//! Commands go to `commands`. Anything else an operator sends feeds their
//! collection session (`collect`). Other users only get the start message.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use vaultlink_core::{
    domain::{ChatId, UserId},
    formatting::escape_html,
    security::is_operator,
};

use crate::{router::AppState, send_html};

mod broadcast;
mod collect;
mod commands;
mod deliver;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
    }

    if is_operator(sender(&msg), &state.cfg.operator_ids) {
        return collect::handle_operator_input(bot, msg, state).await;
    }

    send_html(
        &bot,
        ChatId(msg.chat.id.0),
        &escape_html(&state.cfg.start_message),
    )
    .await;
    Ok(())
}

pub(crate) fn sender(msg: &Message) -> Option<UserId> {
    msg.from().and_then(|u| i64::try_from(u.id.0).ok()).map(UserId)
}
