/// `true` if every byte is an ASCII alphanumeric or one of `extra`.
#[must_use]
pub const fn is_all_alnum_or(s: &[u8], extra: &[u8]) -> bool {
    let mut i = 0;
    while i < s.len() {
        let b = s[i];
        if !b.is_ascii_alphanumeric() && !contains(extra, b) {
            return false;
        }
        i += 1;
    }
    true
}

const fn contains(set: &[u8], b: u8) -> bool {
    let mut i = 0;
    while i < set.len() {
        if set[i] == b {
            return true;
        }
        i += 1;
    }
    false
}

/// Text between the last two `'` of `line`, if there are at least two.
#[must_use]
pub fn last_quoted(line: &str) -> Option<&str> {
    let end = line.rfind('\'')?;
    let start = line[..end].rfind('\'')?;
    Some(&line[start + 1..end])
}
