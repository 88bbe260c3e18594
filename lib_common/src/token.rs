use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A round identifier for a failover set, carried on the wire as a decimal
/// string and compared as an integer.
///
/// Clients ratchet their stored token forward-only: an incoming token is
/// accepted only if it is greater than or equal to the one already held, and
/// the stored token is advanced before the comparison is used for anything
/// else. See [`Token::is_fresh_against`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn zero() -> Self {
        Token("0".to_string())
    }

    pub fn from_value(v: u64) -> Self {
        Token(v.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value. A token that fails to parse (never produced by this
    /// crate, but possible from a misbehaving peer) sorts as zero.
    pub fn value(&self) -> u64 {
        self.0.parse().unwrap_or(0)
    }

    /// Next token strictly greater than `self` and at least the current wall
    /// clock, so tokens stay monotonic across process restarts.
    pub fn next(&self) -> Token {
        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Token::from_value(std::cmp::max(self.value() + 1, now_millis))
    }

    /// True if `incoming` is not older than `self` — the client-side
    /// acceptance rule.
    pub fn accepts(&self, incoming: &Token) -> bool {
        incoming.value() >= self.value()
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value().cmp(&other.value())
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_strictly_greater() {
        let a = Token::from_value(5);
        let b = a.next();
        assert!(b > a);
    }

    #[test]
    fn accepts_rejects_stale_tokens() {
        let mut current = Token::from_value(10);
        assert!(current.accepts(&Token::from_value(10)));
        assert!(current.accepts(&Token::from_value(11)));
        assert!(!current.accepts(&Token::from_value(9)));
        current = Token::from_value(11);
        assert!(!current.accepts(&Token::from_value(10)));
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        let small = Token::from_value(9);
        let big = Token::from_value(10);
        assert!(small < big);
        assert!("9" > "10");
    }
}
