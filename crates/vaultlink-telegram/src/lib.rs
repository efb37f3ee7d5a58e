//! Telegram adapter (teloxide).
//!
//! This crate implements the `vaultlink-core` ports over the Telegram Bot API
//! and hosts the update router.

use async_trait::async_trait;

use teloxide::{prelude::*, types::ParseMode, ApiError, RequestError};

pub mod handlers;
pub mod router;

use vaultlink_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::Error,
    plan::ItemRef,
    ports::{
        ContentTransfer, DeleteOutcome, ItemDeleter, RecipientGate, TransferError, TransferResult,
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramPorts {
    bot: Bot,
    protect_content: bool,
    force_sub_channels: Vec<i64>,
    join_links: Vec<String>,
}

impl TelegramPorts {
    pub fn new(bot: Bot, protect_content: bool, force_sub_channels: Vec<i64>) -> Self {
        Self {
            bot,
            protect_content,
            force_sub_channels,
            join_links: Vec::new(),
        }
    }

    /// Resolve invite links of the force-subscribe channels. Channels the bot
    /// cannot export a link for are skipped with a warning.
    pub async fn load_join_links(&mut self) {
        let mut links = Vec::with_capacity(self.force_sub_channels.len());
        for &channel in &self.force_sub_channels {
            match self.bot.export_chat_invite_link(tg_chat(ChatId(channel))).await {
                Ok(link) => links.push(link),
                Err(e) => tracing::warn!(channel, "cannot export invite link: {e}"),
            }
        }
        self.join_links = links;
    }

    fn map_transfer_err(e: RequestError) -> TransferError {
        match e {
            RequestError::RetryAfter(wait) => TransferError::Throttled { wait },
            RequestError::Api(
                api @ (ApiError::BotBlocked
                | ApiError::UserDeactivated
                | ApiError::ChatNotFound
                | ApiError::CantInitiateConversation
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup),
            ) => TransferError::Rejected(api.to_string()),
            other => TransferError::Failed(other.to_string()),
        }
    }

    fn handle(recipient: ChatId, id: teloxide::types::MessageId) -> MessageRef {
        MessageRef::new(recipient, MessageId(id.0))
    }
}

pub(crate) fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

pub(crate) fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
    teloxide::types::MessageId(message_id.0)
}

#[async_trait]
impl ContentTransfer for TelegramPorts {
    async fn transfer_item(&self, item: ItemRef, recipient: ChatId) -> TransferResult<MessageRef> {
        let id = self
            .bot
            .copy_message(
                tg_chat(recipient),
                tg_chat(item.archive),
                teloxide::types::MessageId(item.sequence),
            )
            .protect_content(self.protect_content)
            .await
            .map_err(Self::map_transfer_err)?;
        Ok(Self::handle(recipient, id))
    }

    async fn copy_message(
        &self,
        source: MessageRef,
        recipient: ChatId,
    ) -> TransferResult<MessageRef> {
        let id = self
            .bot
            .copy_message(
                tg_chat(recipient),
                tg_chat(source.chat_id),
                tg_msg_id(source.message_id),
            )
            .await
            .map_err(Self::map_transfer_err)?;
        Ok(Self::handle(recipient, id))
    }

    async fn send_notice(&self, recipient: ChatId, text: &str) -> TransferResult<MessageRef> {
        let msg = self
            .bot
            .send_message(tg_chat(recipient), text.to_string())
            .protect_content(self.protect_content)
            .await
            .map_err(Self::map_transfer_err)?;
        Ok(Self::handle(recipient, msg.id))
    }
}

#[async_trait]
impl ItemDeleter for TelegramPorts {
    async fn delete_item(&self, handle: MessageRef) -> Result<DeleteOutcome> {
        match self
            .bot
            .delete_message(tg_chat(handle.chat_id), tg_msg_id(handle.message_id))
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(RequestError::Api(ApiError::MessageToDeleteNotFound)) => {
                Ok(DeleteOutcome::NotFound)
            }
            Err(e) => Err(Error::External(format!("telegram error: {e}"))),
        }
    }
}

#[async_trait]
impl RecipientGate for TelegramPorts {
    async fn is_cleared(&self, user: UserId) -> bool {
        let Ok(uid) = u64::try_from(user.0) else {
            return false;
        };
        for &channel in &self.force_sub_channels {
            match self
                .bot
                .get_chat_member(tg_chat(ChatId(channel)), teloxide::types::UserId(uid))
                .await
            {
                Ok(member) if member.kind.is_present() => {}
                Ok(_) => return false,
                Err(e) => {
                    tracing::warn!(channel, user = user.0, "membership check failed: {e}");
                    return false;
                }
            }
        }
        true
    }

    fn join_links(&self) -> Vec<String> {
        self.join_links.clone()
    }
}

/// Send an HTML reply, logging instead of failing.
pub(crate) async fn send_html(bot: &Bot, chat_id: ChatId, html: &str) {
    if let Err(e) = bot
        .send_message(tg_chat(chat_id), html.to_string())
        .parse_mode(ParseMode::Html)
        .disable_web_page_preview(true)
        .await
    {
        tracing::warn!(chat = chat_id.0, "reply failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn maps_flood_control_to_throttled() {
        let err = TelegramPorts::map_transfer_err(RequestError::RetryAfter(Duration::from_secs(3)));
        assert_eq!(
            err,
            TransferError::Throttled {
                wait: Duration::from_secs(3)
            }
        );
    }

    #[test]
    fn maps_blocked_recipients_to_rejected() {
        let err = TelegramPorts::map_transfer_err(RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(err, TransferError::Rejected(_)));

        let err = TelegramPorts::map_transfer_err(RequestError::Api(ApiError::MessageNotModified));
        assert!(matches!(err, TransferError::Failed(_)));
    }
}
