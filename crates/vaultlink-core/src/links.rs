//! Deep links: publishing plans as `?start=` tokens and resolving them back.

use crate::{
    domain::ChatId,
    errors::Error,
    plan::{DeliveryPlan, ItemRef},
    ports::Store,
    token::TokenCodec,
    Result,
};

/// `https://t.me/<bot>?start=<token>`
pub fn deep_link(bot_username: &str, token: &str) -> String {
    format!(
        "https://t.me/{}?start={token}",
        bot_username.trim_start_matches('@')
    )
}

/// Encode `plan` and persist its annotation, if any, under the token.
///
/// An annotated plan shares its token with the bare plan of the same items,
/// so a token carries at most one message for its lifetime: publishing the
/// bare plan over an annotated token, or a different message over it, fails
/// with [`Error::AnnotationConflict`]. Republishing the same plan is fine.
pub fn publish(codec: &TokenCodec, store: &dyn Store, plan: &DeliveryPlan) -> Result<String> {
    let token = codec.encode(plan)?;
    match plan.message() {
        Some(message) => match store.put_annotation(&token, message)? {
            Some(existing) if existing != message => return Err(Error::AnnotationConflict),
            _ => {}
        },
        None => {
            if store.annotation(&token).is_some() {
                return Err(Error::AnnotationConflict);
            }
        }
    }
    Ok(token)
}

/// Decode a `/start` payload, re-attaching a stored annotation.
pub fn resolve(codec: &TokenCodec, store: &dyn Store, payload: &str) -> Result<DeliveryPlan> {
    let token = payload.trim();
    let plan = codec.decode(token)?;
    Ok(match store.annotation(token) {
        Some(message) => DeliveryPlan::annotated(plan, message),
        None => plan,
    })
}

/// Parse a post link of the archive channel into an item reference.
///
/// Accepted shapes: `https://t.me/c/<internal id>/<seq>` for private channels
/// and `https://t.me/<username>/<seq>` when the archive has a public username.
pub fn parse_post_link(
    text: &str,
    archive: ChatId,
    archive_username: Option<&str>,
) -> Result<Option<ItemRef>> {
    let text = text.trim();
    let Some(path) = ["https://t.me/", "http://t.me/", "t.me/", "https://telegram.me/"]
        .iter()
        .find_map(|p| text.strip_prefix(p))
    else {
        return Ok(None);
    };
    let path = path.split(['?', '#']).next().unwrap_or("");
    let parts = path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>();

    let (source, seq) = match parts.as_slice() {
        ["c", internal, seq] => {
            let internal: i64 = internal
                .parse()
                .map_err(|_| Error::UnexpectedInput("post link has a bad channel id"))?;
            (ChatId(-1_000_000_000_000 - internal), *seq)
        }
        [username, seq] => match archive_username {
            Some(u) if u.trim_start_matches('@').eq_ignore_ascii_case(username) => (archive, *seq),
            _ => {
                return Err(Error::WrongSourceArchive {
                    expected: archive,
                    got: ChatId(0),
                })
            }
        },
        _ => return Ok(None),
    };

    let sequence: i32 = seq
        .parse()
        .map_err(|_| Error::UnexpectedInput("post link has a bad message number"))?;
    if source != archive {
        return Err(Error::WrongSourceArchive {
            expected: archive,
            got: source,
        });
    }
    Ok(Some(ItemRef::new(archive, sequence)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const X: ChatId = ChatId(-1001234567890);

    #[test]
    fn deep_link_shape() {
        assert_eq!(
            deep_link("@vault_bot", "abc_-1"),
            "https://t.me/vault_bot?start=abc_-1"
        );
    }

    #[test]
    fn publish_then_resolve_round_trips_all_shapes() {
        let codec = TokenCodec::new(X);
        let store = MemoryStore::default();
        let item = |s| ItemRef::new(X, s);

        let plans = [
            DeliveryPlan::single(item(1)).unwrap(),
            DeliveryPlan::range(item(100), item(103)).unwrap(),
            DeliveryPlan::list(vec![item(4), item(2)]).unwrap(),
            DeliveryPlan::annotated(DeliveryPlan::list(vec![item(8), item(9)]).unwrap(), "Read me first"),
        ];
        for p in plans {
            let token = publish(&codec, &store, &p).unwrap();
            assert_eq!(resolve(&codec, &store, &token).unwrap(), p);
        }
    }

    #[test]
    fn bare_list_cannot_reuse_an_annotated_token() {
        let codec = TokenCodec::new(X);
        let store = MemoryStore::default();
        let items = || DeliveryPlan::list(vec![ItemRef::new(X, 8), ItemRef::new(X, 9)]).unwrap();
        let special = DeliveryPlan::annotated(items(), "A");

        let token = publish(&codec, &store, &special).unwrap();
        assert!(matches!(
            publish(&codec, &store, &items()),
            Err(Error::AnnotationConflict)
        ));
        assert_eq!(resolve(&codec, &store, &token).unwrap(), special);
    }

    #[test]
    fn published_message_is_never_replaced() {
        let codec = TokenCodec::new(X);
        let store = MemoryStore::default();
        let items = || DeliveryPlan::list(vec![ItemRef::new(X, 8), ItemRef::new(X, 9)]).unwrap();
        let first = DeliveryPlan::annotated(items(), "A");

        let token = publish(&codec, &store, &first).unwrap();
        assert!(matches!(
            publish(&codec, &store, &DeliveryPlan::annotated(items(), "B")),
            Err(Error::AnnotationConflict)
        ));
        assert_eq!(publish(&codec, &store, &first).unwrap(), token);
        assert_eq!(resolve(&codec, &store, &token).unwrap(), first);
    }

    #[test]
    fn resolve_surfaces_codec_errors() {
        let codec = TokenCodec::new(X);
        let store = MemoryStore::default();
        assert!(matches!(
            resolve(&codec, &store, "Zm9vLTEy"),
            Err(Error::UnsupportedPlanShape(_))
        ));
    }

    #[test]
    fn parses_private_post_links() {
        let got = parse_post_link("https://t.me/c/1234567890/42", X, None).unwrap();
        assert_eq!(got, Some(ItemRef::new(X, 42)));

        let err = parse_post_link("https://t.me/c/999/42", X, None).unwrap_err();
        assert!(matches!(err, Error::WrongSourceArchive { .. }));
    }

    #[test]
    fn parses_public_post_links() {
        let got = parse_post_link("t.me/MyArchive/7?single", X, Some("@myarchive")).unwrap();
        assert_eq!(got, Some(ItemRef::new(X, 7)));

        assert!(parse_post_link("https://t.me/other/7", X, Some("myarchive")).is_err());
        assert_eq!(parse_post_link("hello there", X, None).unwrap(), None);
    }
}
