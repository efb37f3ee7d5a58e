//! Collaborator ports. Telegram implements these in `vaultlink-telegram`;
//! tests use in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef, UserId},
    plan::ItemRef,
    Result,
};

/// Failure of one outbound transfer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// Platform flood control: wait this long before trying again.
    #[error("throttled, retry after {wait:?}")]
    Throttled { wait: Duration },

    /// Recipient cannot receive anything (blocked the bot, deactivated, gone).
    #[error("recipient rejected delivery: {0}")]
    Rejected(String),

    #[error("transfer failed: {0}")]
    Failed(String),
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Moves content to recipients.
#[async_trait]
pub trait ContentTransfer: Send + Sync {
    /// Copy one archive item into the recipient's chat.
    async fn transfer_item(&self, item: ItemRef, recipient: ChatId) -> TransferResult<MessageRef>;

    /// Copy an arbitrary message (broadcast source) into the recipient's chat.
    async fn copy_message(&self, source: MessageRef, recipient: ChatId)
        -> TransferResult<MessageRef>;

    /// Send plain text (annotation messages, notices).
    async fn send_notice(&self, recipient: ChatId, text: &str) -> TransferResult<MessageRef>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Removes previously delivered items from a recipient's view.
#[async_trait]
pub trait ItemDeleter: Send + Sync {
    async fn delete_item(&self, handle: MessageRef) -> Result<DeleteOutcome>;
}

/// Membership gate consulted before any delivery.
#[async_trait]
pub trait RecipientGate: Send + Sync {
    async fn is_cleared(&self, user: UserId) -> bool;

    /// Invite links shown to users who are not cleared yet.
    fn join_links(&self) -> Vec<String>;
}

/// Key-value persistence. Synchronous from the caller's point of view.
pub trait Store: Send + Sync {
    /// Store `message` under `token` unless the token already carries one.
    /// Returns the message that was already there, if any.
    fn put_annotation(&self, token: &str, message: &str) -> Result<Option<String>>;
    fn annotation(&self, token: &str) -> Option<String>;

    /// Returns `true` if the user was not known before.
    fn add_user(&self, user: UserId) -> Result<bool>;
    fn remove_user(&self, user: UserId) -> Result<bool>;
    fn users(&self) -> Vec<UserId>;
}
