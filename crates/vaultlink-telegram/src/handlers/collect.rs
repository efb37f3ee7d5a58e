use std::sync::Arc;

use teloxide::prelude::*;

use vaultlink_core::{
    collection::{CollectMode, Finalized, Step},
    domain::ChatId,
    errors::Error,
    formatting::{escape_html, format_step},
    links::{deep_link, parse_post_link, publish},
    plan::{DeliveryPlan, ItemRef},
    Result,
};

use crate::{router::AppState, send_html, tg_chat};

use super::sender;

pub async fn handle_operator_input(
    bot: Bot,
    msg: Message,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(op) = sender(&msg) else {
        return Ok(());
    };
    let chat = ChatId(msg.chat.id.0);

    let Some(mode) = state.registry.active_mode(op).await else {
        return archive_and_link(&bot, &msg, &state).await;
    };

    let result = if let Some(item) = forwarded_item(&msg) {
        state.registry.offer_item(op, item).await
    } else if let Some(text) = msg.text() {
        match parse_post_link(
            text,
            state.cfg.archive_channel,
            state.cfg.archive_username.as_deref(),
        ) {
            Ok(Some(item)) => state.registry.offer_item(op, item).await,
            Ok(None) => state.registry.offer_text(op, text).await,
            Err(e) => Err(e),
        }
    } else {
        Err(Error::UnexpectedInput(
            "forward a post from the archive channel",
        ))
    };

    report_step(&bot, &state, chat, mode, result).await;
    Ok(())
}

/// Tell the operator what happened and what to do next. Finalized plans are
/// published and answered with their deep link.
pub(super) async fn report_step(
    bot: &Bot,
    state: &AppState,
    chat: ChatId,
    mode: CollectMode,
    result: Result<Step>,
) {
    let html = match result {
        Ok(Step::Finalized(out)) => {
            match publish(state.codec(), state.store.as_ref(), &out.plan) {
                Ok(token) => {
                    let link = deep_link(&state.bot_username, &token);
                    tracing::info!(
                        operator_chat = chat.0,
                        mode = mode.label(),
                        items = out.plan.item_count(),
                        "link created"
                    );
                    format_step(&Step::Finalized(out), mode, Some(&link))
                }
                Err(e) => {
                    tracing::warn!(operator_chat = chat.0, "publishing link failed: {e}");
                    escape_html(&e.operator_message())
                }
            }
        }
        Ok(step) => format_step(&step, mode, None),
        Err(e) => {
            tracing::debug!(operator_chat = chat.0, "step rejected: {e}");
            escape_html(&e.operator_message())
        }
    };
    send_html(bot, chat, &html).await;
}

/// The source of a message forwarded from a channel.
fn forwarded_item(msg: &Message) -> Option<ItemRef> {
    let source = msg.forward_from_chat()?;
    let sequence = msg.forward_from_message_id()?;
    Some(ItemRef::new(ChatId(source.id.0), sequence))
}

/// No session: store the message in the archive (unless it already comes
/// from there) and answer with a Single link.
async fn archive_and_link(bot: &Bot, msg: &Message, state: &AppState) -> ResponseResult<()> {
    let chat = ChatId(msg.chat.id.0);
    let archive = state.cfg.archive_channel;

    let item = match forwarded_item(msg) {
        Some(item) if item.archive == archive => item,
        _ => match bot
            .copy_message(tg_chat(archive), msg.chat.id, msg.id)
            .await
        {
            Ok(id) => ItemRef::new(archive, id.0),
            Err(e) => {
                tracing::warn!(archive = archive.0, "copy into archive failed: {e}");
                send_html(
                    bot,
                    chat,
                    "Could not store this message in the archive channel. Make sure the bot is an admin there.",
                )
                .await;
                return Ok(());
            }
        },
    };

    let result = DeliveryPlan::single(item).and_then(|plan| {
        let token = state.codec().encode(&plan)?;
        Ok(Step::Finalized(Finalized { plan, token }))
    });
    report_step(bot, state, chat, CollectMode::Single, result).await;
    Ok(())
}
