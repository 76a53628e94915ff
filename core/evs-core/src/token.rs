//! Session tokens for privileged stream clients.

use std::fmt;
use ulid::Ulid;

/// Opaque capability handed to the system viewer activity.
///
/// Tokens compare by identity: a fresh mint never equals an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Ulid);

impl SessionToken {
    pub fn mint() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_are_unique() {
        let first = SessionToken::mint();
        let second = SessionToken::mint();
        assert_ne!(first, second);
    }
}
