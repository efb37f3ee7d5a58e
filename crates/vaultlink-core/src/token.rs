//! Reversible token codec for delivery plans.
//!
//! Wire format (must stay stable, links are already out in the wild):
//! - `get-<n>`: one item
//! - `get-<first>-<last>`: inclusive ascending range
//! - `custombatch-<n1>-<n2>-...`: explicit item list
//!
//! Every locator is `sequence * |archive id|`, so a bare sequence number from
//! one archive does not decode against another. The text is then encoded as
//! URL-safe base64 without padding so it can travel as a `?start=` payload.
//! Telegram accepts at most 64 characters there, which bounds a custom batch
//! to two items for typical channel ids.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::{
    domain::ChatId,
    errors::Error,
    plan::{check_sequence, DeliveryPlan, ItemRef},
    Result,
};

const SINGLE_OR_RANGE: &str = "get";
const CUSTOM_BATCH: &str = "custombatch";

/// Longest `?start=` payload Telegram accepts.
pub const MAX_TOKEN_LEN: usize = 64;

#[derive(Clone, Copy, Debug)]
pub struct TokenCodec {
    archive: ChatId,
}

impl TokenCodec {
    pub fn new(archive: ChatId) -> Self {
        Self { archive }
    }

    pub fn archive(&self) -> ChatId {
        self.archive
    }

    /// Encode a plan. Annotated plans encode as their inner plan; the message
    /// is stored separately (see [`crate::links::publish`]).
    ///
    /// Fails for plans that would not decode back to themselves and for
    /// tokens longer than [`MAX_TOKEN_LEN`].
    pub fn encode(&self, plan: &DeliveryPlan) -> Result<String> {
        self.check(plan)?;
        let token = URL_SAFE_NO_PAD.encode(plan_text(plan));
        if token.len() > MAX_TOKEN_LEN {
            return Err(Error::TokenTooLong {
                len: token.len(),
                max: MAX_TOKEN_LEN,
            });
        }
        Ok(token)
    }

    pub fn decode(&self, token: &str) -> Result<DeliveryPlan> {
        let raw = token.trim().trim_end_matches('=');
        if raw.is_empty() {
            return Err(Error::MalformedToken("empty token".to_string()));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| Error::MalformedToken(format!("not base64: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| Error::MalformedToken("payload is not utf-8".to_string()))?;

        let Some((prefix, rest)) = text.split_once('-') else {
            return Err(Error::MalformedToken("missing '-' separator".to_string()));
        };
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::MalformedToken(format!("bad prefix {prefix:?}")));
        }

        let args = rest.split('-').collect::<Vec<_>>();
        match prefix {
            SINGLE_OR_RANGE => match args.as_slice() {
                [n] => Ok(DeliveryPlan::Single(self.locate(n)?)),
                [a, b] => {
                    let first = self.locate(a)?;
                    let last = self.locate(b)?;
                    DeliveryPlan::range(first, last)
                        .map_err(|e| Error::MalformedToken(e.to_string()))
                }
                _ => Err(Error::MalformedToken(format!(
                    "`get` takes 1 or 2 locators, got {}",
                    args.len()
                ))),
            },
            CUSTOM_BATCH => {
                let items = args
                    .iter()
                    .map(|a| self.locate(a))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DeliveryPlan::List(items))
            }
            other => Err(Error::UnsupportedPlanShape(other.to_string())),
        }
    }

    fn check(&self, plan: &DeliveryPlan) -> Result<()> {
        match plan {
            DeliveryPlan::Single(item) => self.check_item(item),
            DeliveryPlan::Range { first, last } => {
                self.check_item(first)?;
                self.check_item(last)?;
                if last.sequence < first.sequence {
                    return Err(Error::InvertedRange {
                        first: first.sequence,
                        last: last.sequence,
                    });
                }
                Ok(())
            }
            DeliveryPlan::List(items) => {
                if items.is_empty() {
                    return Err(Error::EmptyCollection);
                }
                items.iter().try_for_each(|i| self.check_item(i))
            }
            DeliveryPlan::Annotated { plan, .. } => self.check(plan),
        }
    }

    fn check_item(&self, item: &ItemRef) -> Result<()> {
        if item.archive != self.archive {
            return Err(Error::WrongSourceArchive {
                expected: self.archive,
                got: item.archive,
            });
        }
        check_sequence(item)
    }

    fn factor(&self) -> i128 {
        archive_factor(self.archive)
    }

    fn locate(&self, raw: &str) -> Result<ItemRef> {
        let locator: i128 = raw
            .parse()
            .map_err(|_| Error::MalformedToken(format!("bad locator {raw:?}")))?;
        if locator <= 0 {
            return Err(Error::MalformedToken(format!("bad locator {raw:?}")));
        }
        let factor = self.factor();
        if locator % factor != 0 {
            return Err(Error::MalformedToken(
                "locator does not belong to this archive".to_string(),
            ));
        }
        let sequence = i32::try_from(locator / factor)
            .map_err(|_| Error::MalformedToken(format!("sequence out of range in {raw:?}")))?;
        Ok(ItemRef::new(self.archive, sequence))
    }
}

fn archive_factor(archive: ChatId) -> i128 {
    i128::from(archive.0.unsigned_abs().max(1))
}

fn locator(item: &ItemRef) -> i128 {
    i128::from(item.sequence) * archive_factor(item.archive)
}

fn plan_text(plan: &DeliveryPlan) -> String {
    match plan {
        DeliveryPlan::Single(item) => format!("{SINGLE_OR_RANGE}-{}", locator(item)),
        DeliveryPlan::Range { first, last } => {
            format!("{SINGLE_OR_RANGE}-{}-{}", locator(first), locator(last))
        }
        DeliveryPlan::List(items) => {
            let mut out = CUSTOM_BATCH.to_string();
            for item in items {
                out.push('-');
                out.push_str(&locator(item).to_string());
            }
            out
        }
        DeliveryPlan::Annotated { plan, .. } => plan_text(plan),
    }
}
