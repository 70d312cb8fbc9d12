//! Longest-prefix selection.

/// Pick the entry whose prefix is the longest literal prefix of `path`.
///
/// Entries are scanned in order and a candidate only replaces the current
/// best when its prefix is strictly longer, so equal-length prefixes resolve
/// to the first one registered. Returns `None` when nothing matches; there
/// is no implicit `/` fallback.
pub fn longest_prefix<'a, T, F>(entries: &'a [T], path: &str, prefix_of: F) -> Option<&'a T>
where
    F: Fn(&T) -> &str,
{
    let mut best: Option<(&'a T, usize)> = None;
    for entry in entries {
        let prefix = prefix_of(entry);
        if !path.starts_with(prefix) {
            continue;
        }
        if best.is_none_or(|(_, len)| prefix.len() > len) {
            best = Some((entry, prefix.len()));
        }
    }
    best.map(|(entry, _)| entry)
}
