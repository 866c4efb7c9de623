use std::collections::BTreeSet;

use crate::error::{Result, TransportError};

/// Multi-level wildcard token used in subscriber topic names.
pub const MULTI_LEVEL_WILDCARD: char = '#';
/// The broker's native wildcard token.
pub const BROKER_WILDCARD: char = '*';

/// Merge topic names into one composite destination string.
///
/// Duplicates are dropped, names are joined with `,` in sorted order and the
/// multi-level wildcard is rewritten to the broker's native token.
///
/// ```
/// use sourced_broker::merge_topics;
///
/// assert_eq!(merge_topics(["a.c", "a.b", "a.b"]).unwrap(), "a.b,a.c");
/// assert_eq!(merge_topics(["#.x"]).unwrap(), "*.x");
/// ```
pub fn merge_topics<I, S>(topics: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let unique: BTreeSet<String> = topics
        .into_iter()
        .map(|topic| topic.as_ref().to_string())
        .collect();

    if unique.is_empty() {
        return Err(TransportError::invalid_argument("topics must not be empty"));
    }
    if unique.iter().any(|topic| topic.trim().is_empty()) {
        return Err(TransportError::invalid_argument("topic names must not be blank"));
    }

    let joined = unique.into_iter().collect::<Vec<_>>().join(",");
    Ok(joined.replace(MULTI_LEVEL_WILDCARD, &BROKER_WILDCARD.to_string()))
}
