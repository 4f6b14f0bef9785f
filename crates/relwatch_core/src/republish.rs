use chrono::{DateTime, Utc};

/// Decides whether saving over an existing `(tracker, tag)` row is a
/// republish: the same tag now points at a different commit, so users
/// must re-pull. Metadata edits (notes, display name) are not.
///
/// When both commit identities are known they are compared directly. When
/// neither is known (chart indexes, locked-down instances) the publication
/// timestamp is the only signal left. A one-sided missing SHA is most
/// often a temporary upstream-permission reduction and never counts, so a
/// flapping token cannot fire false republish notifications.
pub fn is_republish(
    old_commit: Option<&str>,
    new_commit: Option<&str>,
    old_published_at: DateTime<Utc>,
    new_published_at: DateTime<Utc>,
) -> bool {
    match (normalize(old_commit), normalize(new_commit)) {
        (Some(old), Some(new)) => old != new,
        (None, None) => old_published_at != new_published_at,
        _ => false,
    }
}

fn normalize(sha: Option<&str>) -> Option<&str> {
    sha.filter(|s| !s.is_empty())
}
