//! DNS query filtering module.
//!
//! Provides ad-blocking by matching queried domains against a blacklist of
//! glob patterns (`*` matches any run of characters, `?` exactly one).
//! Matching is case-sensitive and applies to the whole dotted domain.

mod blocklist;

pub use blocklist::{FileBlacklist, PatternList};

use crate::error::BlacklistError;

/// Membership test against the blacklist.
pub trait Blacklist: Send + Sync {
    /// Whether `domain` matches any blacklist pattern.
    fn is_blocked(&self, domain: &str) -> Result<bool, BlacklistError>;
}

/// Glob match of `text` against `pattern`.
///
/// Iterative with single-star backtracking, so adversarial patterns cannot
/// recurse deeply.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, t));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Whether `pattern` only uses characters allowed in blacklist entries.
pub fn valid_pattern(pattern: &str) -> bool {
    !pattern.is_empty()
        && pattern
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'-' | b'*' | b'?'))
}
