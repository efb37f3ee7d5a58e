use crate::domain::ChatId;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so handlers can
/// decide what to show the operator and what stays in the logs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Token codec
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("unsupported plan shape: {0}")]
    UnsupportedPlanShape(String),

    #[error("token of {len} characters exceeds the limit of {max}")]
    TokenTooLong { len: usize, max: usize },

    #[error("token is already published with a different message")]
    AnnotationConflict,

    // Collection sessions
    #[error("item comes from chat {got:?}, expected archive {expected:?}")]
    WrongSourceArchive { expected: ChatId, got: ChatId },

    #[error("item sequence must be positive, got {0}")]
    InvalidSequence(i32),

    #[error("range is inverted: last {last} precedes first {first}")]
    InvertedRange { first: i32, last: i32 },

    #[error("range of {count} items exceeds the limit of {max}")]
    RangeTooLarge { count: u64, max: u64 },

    #[error("no items were collected")]
    EmptyCollection,

    #[error("no active collection session")]
    NoActiveSession,

    #[error("unexpected input: {0}")]
    UnexpectedInput(&'static str),

    #[error("a broadcast is already running")]
    BroadcastInProgress,

    // Ambient
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Text shown to an operator when one of their steps fails.
    pub fn operator_message(&self) -> String {
        match self {
            Error::MalformedToken(_) | Error::UnsupportedPlanShape(_) => {
                "That link is not valid.".to_string()
            }
            Error::TokenTooLong { len, max } => format!(
                "That link would be {len} characters long, Telegram allows {max}. Send /done with the posts collected so far, or split them over several links."
            ),
            Error::AnnotationConflict => {
                "A link with exactly these posts already exists with a different message. Add or remove a post to get a separate link.".to_string()
            }
            Error::InvalidSequence(_) => {
                "That post number is not valid. Forward the post from the archive channel instead.".to_string()
            }
            Error::WrongSourceArchive { .. } => {
                "This item is not from the archive channel. Forward a post from the archive or send its link.".to_string()
            }
            Error::InvertedRange { first, last } => format!(
                "The last post ({last}) comes before the first one ({first}). Forward a later post as the last item."
            ),
            Error::RangeTooLarge { count, max } => format!(
                "That range holds {count} posts, the limit is {max}. Forward an earlier last post."
            ),
            Error::EmptyCollection => {
                "Nothing collected yet. Forward at least one post before /done.".to_string()
            }
            Error::NoActiveSession => {
                "No link is being built. Start with /genlink, /batch, /custom_batch or /special."
                    .to_string()
            }
            Error::UnexpectedInput(what) => format!("Unexpected input: {what}."),
            Error::BroadcastInProgress => {
                "A broadcast is already running. Check it with /progress.".to_string()
            }
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::External(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_messages_are_actionable() {
        let msg = Error::RangeTooLarge { count: 500, max: 200 }.operator_message();
        assert!(msg.contains("500"));
        assert!(msg.contains("200"));

        let msg = Error::Io(std::io::Error::other("disk")).operator_message();
        assert!(!msg.contains("disk"));
    }
}
