//! Operator-driven collection of archive items into a delivery plan.
//!
//! Flows:
//! - `Single`:    Idle -> CollectingFirst -> Finalizing -> Finalized
//! - `Range`:     Idle -> CollectingFirst -> CollectingLast -> Finalizing -> Finalized
//! - `List`:      Idle -> Collecting -> Finalizing -> Finalized
//! - `Annotated`: Idle -> Collecting -> AwaitingMessage -> Finalizing -> Finalized
//!
//! A failed step returns an error and leaves the session exactly as it was,
//! so the operator can retry the same step.

use crate::{
    errors::Error,
    plan::{check_sequence, DeliveryPlan, ItemRef},
    token::TokenCodec,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectMode {
    Single,
    Range,
    List,
    Annotated,
}

impl CollectMode {
    pub fn label(self) -> &'static str {
        match self {
            CollectMode::Single => "single link",
            CollectMode::Range => "batch",
            CollectMode::List => "custom batch",
            CollectMode::Annotated => "special batch",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectState {
    Idle,
    CollectingFirst,
    CollectingLast,
    Collecting,
    AwaitingMessage,
    Finalizing,
    Finalized,
    Cancelled,
}

impl CollectState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CollectState::Finalized | CollectState::Cancelled)
    }
}

/// Ceilings for one session. Both must be at least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectLimits {
    pub max_items: usize,
    pub max_range: u64,
}

/// Outcome of a successful session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finalized {
    pub plan: DeliveryPlan,
    pub token: String,
}

/// What happened on a step, and what the operator should do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    AwaitingFirst,
    AwaitingLast { first: ItemRef },
    Added { count: usize },
    Duplicate { count: usize },
    AwaitingMessage { count: usize },
    Finalized(Finalized),
    Cancelled,
}

#[derive(Debug)]
pub struct CollectionSession {
    mode: CollectMode,
    state: CollectState,
    codec: TokenCodec,
    limits: CollectLimits,
    first: Option<ItemRef>,
    items: Vec<ItemRef>,
    pending_message: Option<String>,
}

impl CollectionSession {
    pub fn new(mode: CollectMode, codec: TokenCodec, limits: CollectLimits) -> Self {
        Self {
            mode,
            state: CollectState::Idle,
            codec,
            limits: CollectLimits {
                max_items: limits.max_items.max(1),
                max_range: limits.max_range.max(1),
            },
            first: None,
            items: Vec::new(),
            pending_message: None,
        }
    }

    pub fn mode(&self) -> CollectMode {
        self.mode
    }

    pub fn state(&self) -> CollectState {
        self.state
    }

    pub fn items(&self) -> &[ItemRef] {
        &self.items
    }

    pub fn pending_message(&self) -> Option<&str> {
        self.pending_message.as_deref()
    }

    /// Leave `Idle`.
    pub fn start(&mut self) -> Result<Step> {
        if self.state != CollectState::Idle {
            return Err(Error::UnexpectedInput("session already started"));
        }
        match self.mode {
            CollectMode::Single | CollectMode::Range => {
                self.state = CollectState::CollectingFirst;
                Ok(Step::AwaitingFirst)
            }
            CollectMode::List | CollectMode::Annotated => {
                self.state = CollectState::Collecting;
                Ok(Step::Added { count: 0 })
            }
        }
    }

    /// Feed one forwarded archive item.
    pub fn offer_item(&mut self, item: ItemRef) -> Result<Step> {
        if item.archive != self.codec.archive() {
            return Err(Error::WrongSourceArchive {
                expected: self.codec.archive(),
                got: item.archive,
            });
        }

        match (self.state, self.mode) {
            (CollectState::CollectingFirst, CollectMode::Single) => {
                let plan = DeliveryPlan::single(item)?;
                self.finalize(plan)
            }
            (CollectState::CollectingFirst, _) => {
                check_sequence(&item)?;
                self.first = Some(item);
                self.state = CollectState::CollectingLast;
                Ok(Step::AwaitingLast { first: item })
            }
            (CollectState::CollectingLast, _) => {
                let Some(first) = self.first else {
                    return Err(Error::UnexpectedInput("range has no first item"));
                };
                let plan = DeliveryPlan::range(first, item)?;
                let count = plan.item_count();
                if count > self.limits.max_range {
                    return Err(Error::RangeTooLarge {
                        count,
                        max: self.limits.max_range,
                    });
                }
                self.finalize(plan)
            }
            (CollectState::Collecting, _) => {
                if self.items.contains(&item) {
                    return Ok(Step::Duplicate {
                        count: self.items.len(),
                    });
                }
                let mut candidate = self.items.clone();
                candidate.push(item);
                // The link must still fit once this item is in.
                self.codec.encode(&DeliveryPlan::list(candidate)?)?;
                self.items.push(item);
                if self.items.len() >= self.limits.max_items {
                    return self.close_collecting();
                }
                Ok(Step::Added {
                    count: self.items.len(),
                })
            }
            (CollectState::AwaitingMessage, _) => {
                Err(Error::UnexpectedInput("expected the message text, not an item"))
            }
            (CollectState::Idle, _) => Err(Error::UnexpectedInput("session not started")),
            (CollectState::Finalizing | CollectState::Finalized | CollectState::Cancelled, _) => {
                Err(Error::NoActiveSession)
            }
        }
    }

    /// Operator's explicit "done" for List/Annotated collection.
    pub fn done(&mut self) -> Result<Step> {
        match self.state {
            CollectState::Collecting => self.close_collecting(),
            CollectState::Finalized | CollectState::Cancelled => Err(Error::NoActiveSession),
            _ => Err(Error::UnexpectedInput("/done only ends a custom or special batch")),
        }
    }

    /// Free text while awaiting the annotation message.
    pub fn offer_text(&mut self, text: &str) -> Result<Step> {
        if self.state != CollectState::AwaitingMessage {
            return Err(Error::UnexpectedInput("expected a forwarded archive post"));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::UnexpectedInput("the message must not be empty"));
        }
        let base = DeliveryPlan::list(self.items.clone())?;
        let step = self.finalize(DeliveryPlan::annotated(base, text))?;
        self.pending_message = Some(text.to_string());
        Ok(step)
    }

    pub fn cancel(&mut self) -> Step {
        self.state = CollectState::Cancelled;
        Step::Cancelled
    }

    fn close_collecting(&mut self) -> Result<Step> {
        if self.items.is_empty() {
            return Err(Error::EmptyCollection);
        }
        match self.mode {
            CollectMode::Annotated => {
                self.state = CollectState::AwaitingMessage;
                Ok(Step::AwaitingMessage {
                    count: self.items.len(),
                })
            }
            _ => {
                let plan = DeliveryPlan::list(self.items.clone())?;
                self.finalize(plan)
            }
        }
    }

    /// Encode the plan and close the session. On failure the session goes
    /// back to the state it was in.
    fn finalize(&mut self, plan: DeliveryPlan) -> Result<Step> {
        let previous = self.state;
        self.state = CollectState::Finalizing;
        match self.codec.encode(&plan) {
            Ok(token) => {
                self.state = CollectState::Finalized;
                Ok(Step::Finalized(Finalized { plan, token }))
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatId;

    const X: ChatId = ChatId(-1001234567890);

    fn session(mode: CollectMode) -> CollectionSession {
        let mut s = CollectionSession::new(
            mode,
            TokenCodec::new(X),
            CollectLimits {
                max_items: 2,
                max_range: 10,
            },
        );
        s.start().unwrap();
        s
    }

    fn item(seq: i32) -> ItemRef {
        ItemRef::new(X, seq)
    }

    #[test]
    fn range_flow_emits_decodable_token() {
        let mut s = session(CollectMode::Range);
        assert_eq!(s.state(), CollectState::CollectingFirst);
        assert_eq!(
            s.offer_item(item(100)).unwrap(),
            Step::AwaitingLast { first: item(100) }
        );
        let Step::Finalized(out) = s.offer_item(item(103)).unwrap() else {
            panic!("expected finalized");
        };
        assert_eq!(s.state(), CollectState::Finalized);
        assert_eq!(TokenCodec::new(X).decode(&out.token).unwrap(), out.plan);
    }

    #[test]
    fn inverted_range_keeps_state() {
        let mut s = session(CollectMode::Range);
        s.offer_item(item(50)).unwrap();
        let err = s.offer_item(item(49)).unwrap_err();
        assert!(matches!(err, Error::InvertedRange { first: 50, last: 49 }));
        assert_eq!(s.state(), CollectState::CollectingLast);

        // Retrying the same step works.
        assert!(matches!(s.offer_item(item(51)).unwrap(), Step::Finalized(_)));
    }

    #[test]
    fn range_ceiling_is_enforced() {
        let mut s = session(CollectMode::Range);
        s.offer_item(item(1)).unwrap();
        let err = s.offer_item(item(11)).unwrap_err();
        assert!(matches!(err, Error::RangeTooLarge { count: 11, max: 10 }));
        assert_eq!(s.state(), CollectState::CollectingLast);
        assert!(s.offer_item(item(10)).is_ok());
    }

    #[test]
    fn foreign_items_are_rejected_without_state_change() {
        let mut s = session(CollectMode::List);
        s.offer_item(item(1)).unwrap();
        let err = s.offer_item(ItemRef::new(ChatId(-1005), 2)).unwrap_err();
        assert!(matches!(err, Error::WrongSourceArchive { .. }));
        assert_eq!(s.items(), &[item(1)]);
        assert_eq!(s.state(), CollectState::Collecting);
    }

    #[test]
    fn duplicate_items_are_added_once() {
        let mut s = session(CollectMode::List);
        s.offer_item(item(4)).unwrap();
        assert_eq!(s.offer_item(item(4)).unwrap(), Step::Duplicate { count: 1 });
        assert_eq!(s.items().len(), 1);
    }

    #[test]
    fn list_auto_finalizes_at_ceiling() {
        let mut s = session(CollectMode::List);
        s.offer_item(item(3)).unwrap();
        let Step::Finalized(out) = s.offer_item(item(1)).unwrap() else {
            panic!("expected auto-finalize");
        };
        assert_eq!(out.plan, DeliveryPlan::List(vec![item(3), item(1)]));
    }

    #[test]
    fn list_stops_accepting_once_the_link_is_full() {
        let mut s = CollectionSession::new(
            CollectMode::List,
            TokenCodec::new(X),
            CollectLimits {
                max_items: 100,
                max_range: 100,
            },
        );
        s.start().unwrap();
        s.offer_item(item(1001)).unwrap();
        s.offer_item(item(1002)).unwrap();

        let err = s.offer_item(item(1003)).unwrap_err();
        assert!(matches!(err, Error::TokenTooLong { .. }));
        assert_eq!(s.items(), &[item(1001), item(1002)]);
        assert_eq!(s.state(), CollectState::Collecting);

        let Step::Finalized(out) = s.done().unwrap() else {
            panic!("expected finalized");
        };
        assert!(out.token.len() <= crate::token::MAX_TOKEN_LEN);
        assert_eq!(TokenCodec::new(X).decode(&out.token).unwrap(), out.plan);
    }

    #[test]
    fn oversized_range_link_keeps_state() {
        let mut s = CollectionSession::new(
            CollectMode::Range,
            TokenCodec::new(X),
            CollectLimits {
                max_items: 10,
                max_range: 10,
            },
        );
        s.start().unwrap();
        s.offer_item(item(i32::MAX - 1)).unwrap();
        let err = s.offer_item(item(i32::MAX)).unwrap_err();
        assert!(matches!(err, Error::TokenTooLong { .. }));
        assert_eq!(s.state(), CollectState::CollectingLast);
    }

    #[test]
    fn non_positive_sequences_are_rejected() {
        let mut s = session(CollectMode::Single);
        assert!(matches!(s.offer_item(item(0)), Err(Error::InvalidSequence(0))));
        assert_eq!(s.state(), CollectState::CollectingFirst);
    }

    #[test]
    fn done_on_empty_collection_fails() {
        let mut s = session(CollectMode::List);
        assert!(matches!(s.done(), Err(Error::EmptyCollection)));
        assert_eq!(s.state(), CollectState::Collecting);
    }

    #[test]
    fn annotated_flow_waits_for_message() {
        let mut s = session(CollectMode::Annotated);
        s.offer_item(item(8)).unwrap();
        assert_eq!(s.done().unwrap(), Step::AwaitingMessage { count: 1 });
        assert!(matches!(s.offer_item(item(9)), Err(Error::UnexpectedInput(_))));
        assert!(matches!(s.offer_text("   "), Err(Error::UnexpectedInput(_))));
        assert_eq!(s.state(), CollectState::AwaitingMessage);

        let Step::Finalized(out) = s.offer_text("Enjoy!").unwrap() else {
            panic!("expected finalized");
        };
        assert_eq!(out.plan.message(), Some("Enjoy!"));
        assert_eq!(out.plan.base(), &DeliveryPlan::List(vec![item(8)]));
        assert_eq!(s.pending_message(), Some("Enjoy!"));
    }

    #[test]
    fn single_flow_finalizes_on_first_item() {
        let mut s = session(CollectMode::Single);
        let Step::Finalized(out) = s.offer_item(item(77)).unwrap() else {
            panic!("expected finalized");
        };
        assert_eq!(out.plan, DeliveryPlan::Single(item(77)));
    }

    #[test]
    fn cancelled_session_rejects_input() {
        let mut s = session(CollectMode::List);
        assert_eq!(s.cancel(), Step::Cancelled);
        assert!(s.state().is_terminal());
        assert!(matches!(s.offer_item(item(1)), Err(Error::NoActiveSession)));
    }
}
