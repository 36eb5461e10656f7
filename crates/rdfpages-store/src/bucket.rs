//! Subject keys: the short prefix that shards every bucketed table.
//!
//! The key is part of the persisted format. Builder and reader must derive
//! it identically, so it lives in one place.

/// Derive the bucket key for a subject.
///
/// MID-shaped subjects (`m.` / `g.`) use their first 4 UTF-16 code units;
/// every other subject uses its first 2. Shorter subjects use what they have.
pub fn subject_key(subject: &str) -> &str {
    let width = if is_mid_shaped(subject) { 4 } else { 2 };
    utf16_prefix(subject, width)
}

/// The longest prefix of `s` spanning at most `units` UTF-16 code units.
/// A surrogate pair straddling the limit is left out whole.
pub fn utf16_prefix(s: &str, units: usize) -> &str {
    let mut used = 0;
    for (at, c) in s.char_indices() {
        used += c.len_utf16();
        if used > units {
            return &s[..at];
        }
    }
    s
}

/// Length in UTF-16 code units, the unit every persisted length uses.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// `m.` and `g.` prefixed identifiers name Freebase entities or CVTs.
pub fn is_mid_shaped(id: &str) -> bool {
    id.starts_with("m.") || id.starts_with("g.")
}
