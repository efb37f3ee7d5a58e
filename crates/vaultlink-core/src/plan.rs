//! Delivery plans: what a token tells the bot to send.

use crate::{domain::ChatId, errors::Error, Result};

/// Locator of one stored item: the archive channel plus the post's position in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub archive: ChatId,
    pub sequence: i32,
}

impl ItemRef {
    pub fn new(archive: ChatId, sequence: i32) -> Self {
        Self { archive, sequence }
    }
}

/// Structured delivery instruction embedded in a token.
///
/// The variants are public for matching. Build plans with the constructors:
/// they reject sequences below 1, inverted ranges, empty lists and mixed
/// archives. [`crate::token::TokenCodec::encode`] applies the same checks to
/// plans assembled by hand, so an ill-formed plan never becomes a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryPlan {
    Single(ItemRef),
    Range { first: ItemRef, last: ItemRef },
    List(Vec<ItemRef>),
    Annotated { plan: Box<DeliveryPlan>, message: String },
}

impl DeliveryPlan {
    pub fn single(item: ItemRef) -> Result<Self> {
        check_sequence(&item)?;
        Ok(DeliveryPlan::Single(item))
    }

    pub fn range(first: ItemRef, last: ItemRef) -> Result<Self> {
        check_sequence(&first)?;
        check_sequence(&last)?;
        if first.archive != last.archive {
            return Err(Error::WrongSourceArchive {
                expected: first.archive,
                got: last.archive,
            });
        }
        if last.sequence < first.sequence {
            return Err(Error::InvertedRange {
                first: first.sequence,
                last: last.sequence,
            });
        }
        Ok(DeliveryPlan::Range { first, last })
    }

    pub fn list(items: Vec<ItemRef>) -> Result<Self> {
        let Some(head) = items.first() else {
            return Err(Error::EmptyCollection);
        };
        for item in &items {
            check_sequence(item)?;
            if item.archive != head.archive {
                return Err(Error::WrongSourceArchive {
                    expected: head.archive,
                    got: item.archive,
                });
            }
        }
        Ok(DeliveryPlan::List(items))
    }

    /// Wrap a plan with a message shown before its items. Nested annotations
    /// collapse: the outer message wins.
    pub fn annotated(plan: DeliveryPlan, message: impl Into<String>) -> Self {
        let inner = match plan {
            DeliveryPlan::Annotated { plan, .. } => *plan,
            other => other,
        };
        DeliveryPlan::Annotated {
            plan: Box::new(inner),
            message: message.into(),
        }
    }

    /// The plan without its annotation, if any.
    pub fn base(&self) -> &DeliveryPlan {
        match self {
            DeliveryPlan::Annotated { plan, .. } => plan,
            other => other,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            DeliveryPlan::Annotated { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }

    /// Number of items the plan expands to.
    pub fn item_count(&self) -> u64 {
        match self {
            DeliveryPlan::Single(_) => 1,
            DeliveryPlan::Range { first, last } => {
                (i64::from(last.sequence) - i64::from(first.sequence) + 1).max(0) as u64
            }
            DeliveryPlan::List(items) => items.len() as u64,
            DeliveryPlan::Annotated { plan, .. } => plan.item_count(),
        }
    }

    /// Ordered item sequence: one item, ascending range, or stored list order.
    pub fn expand(&self) -> Vec<ItemRef> {
        match self {
            DeliveryPlan::Single(item) => vec![*item],
            DeliveryPlan::Range { first, last } => (first.sequence..=last.sequence)
                .map(|seq| ItemRef::new(first.archive, seq))
                .collect(),
            DeliveryPlan::List(items) => items.clone(),
            DeliveryPlan::Annotated { plan, .. } => plan.expand(),
        }
    }
}

pub(crate) fn check_sequence(item: &ItemRef) -> Result<()> {
    if item.sequence < 1 {
        return Err(Error::InvalidSequence(item.sequence));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: ChatId = ChatId(-1001234567890);

    #[test]
    fn range_expands_ascending_inclusive() {
        let plan = DeliveryPlan::range(ItemRef::new(X, 100), ItemRef::new(X, 103)).unwrap();
        let seqs: Vec<i32> = plan.expand().iter().map(|i| i.sequence).collect();
        assert_eq!(seqs, vec![100, 101, 102, 103]);
        assert_eq!(plan.item_count(), 4);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = DeliveryPlan::range(ItemRef::new(X, 10), ItemRef::new(X, 9)).unwrap_err();
        assert!(matches!(err, Error::InvertedRange { first: 10, last: 9 }));
    }

    #[test]
    fn list_keeps_insertion_order() {
        let items = vec![ItemRef::new(X, 7), ItemRef::new(X, 2), ItemRef::new(X, 5)];
        let plan = DeliveryPlan::list(items.clone()).unwrap();
        assert_eq!(plan.expand(), items);
        assert!(matches!(
            DeliveryPlan::list(vec![]),
            Err(Error::EmptyCollection)
        ));
    }

    #[test]
    fn constructors_reject_non_positive_sequences() {
        assert!(matches!(
            DeliveryPlan::single(ItemRef::new(X, 0)),
            Err(Error::InvalidSequence(0))
        ));
        assert!(matches!(
            DeliveryPlan::range(ItemRef::new(X, -2), ItemRef::new(X, 3)),
            Err(Error::InvalidSequence(-2))
        ));
        assert!(matches!(
            DeliveryPlan::list(vec![ItemRef::new(X, 4), ItemRef::new(X, -1)]),
            Err(Error::InvalidSequence(-1))
        ));
        assert!(matches!(
            DeliveryPlan::list(vec![ItemRef::new(X, 4), ItemRef::new(ChatId(-1005), 1)]),
            Err(Error::WrongSourceArchive { .. })
        ));
    }

    #[test]
    fn annotation_does_not_nest() {
        let inner = DeliveryPlan::single(ItemRef::new(X, 1)).unwrap();
        let once = DeliveryPlan::annotated(inner.clone(), "a");
        let twice = DeliveryPlan::annotated(once, "b");
        assert_eq!(twice.base(), &inner);
        assert_eq!(twice.message(), Some("b"));
    }
}
