//! Topic pattern matching for composite destinations.

/// Matches exactly one dot-separated segment.
pub const SINGLE_SEGMENT: &str = "*";
/// Matches one or more trailing segments.
pub const TRAILING_SEGMENTS: &str = ">";

/// Whether `topic` is addressed by the (possibly composite) `destination`.
///
/// A composite destination lists several patterns separated by commas; the
/// topic matches if any one of them does.
pub fn destination_matches(destination: &str, topic: &str) -> bool {
    destination
        .split(',')
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .any(|pattern| pattern_matches(pattern, topic))
}

pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    let mut topic_segments = topic.split('.');
    let mut pattern_segments = pattern.split('.').peekable();

    while let Some(expected) = pattern_segments.next() {
        if expected == TRAILING_SEGMENTS && pattern_segments.peek().is_none() {
            return topic_segments.next().is_some();
        }
        match topic_segments.next() {
            Some(actual) if expected == SINGLE_SEGMENT || expected == actual => {}
            _ => return false,
        }
    }

    topic_segments.next().is_none()
}
