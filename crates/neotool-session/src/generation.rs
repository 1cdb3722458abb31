//! Connection lifetimes.
//!
//! Every transport open starts a new [`Generation`]. Tasks capture the
//! generation they were started under and re-check it around every
//! suspension point; a disconnect retires the generation, which also cancels
//! every child token handed out to loops bound to it.

use tokio_util::sync::CancellationToken;

/// Identity and cancellation scope of one connection lifetime.
#[derive(Debug, Clone)]
pub(crate) struct Generation {
    id: u64,
    token: CancellationToken,
}

impl Generation {
    /// Generation zero: no connection has ever opened, so it starts retired.
    pub(crate) fn initial() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self { id: 0, token }
    }

    /// The generation following this one, live until retired.
    pub(crate) fn next(&self) -> Self {
        Self { id: self.id + 1, token: CancellationToken::new() }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// End this lifetime. Idempotent.
    pub(crate) fn retire(&self) {
        self.token.cancel();
    }

    /// Whether `other` is this same, still live, lifetime.
    pub(crate) fn is(&self, other: &Self) -> bool {
        self.id == other.id && !self.is_retired()
    }

    /// Resolves once this generation is retired.
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Token cancelled when either this generation retires or the caller
    /// cancels it.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_generation_is_retired() {
        let generation = Generation::initial();

        assert_eq!(generation.id(), 0);
        assert!(generation.is_retired());
    }

    #[test]
    fn next_is_live_and_strictly_greater() {
        let first = Generation::initial().next();
        let second = first.next();

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert!(!first.is_retired());
    }

    #[test]
    fn retire_cancels_children() {
        let generation = Generation::initial().next();
        let child = generation.child_token();

        generation.retire();

        assert!(child.is_cancelled());
        assert!(generation.is_retired());
    }

    #[test]
    fn retired_generation_is_not_current() {
        let generation = Generation::initial().next();
        let captured = generation.clone();
        assert!(generation.is(&captured));

        generation.retire();

        assert!(!generation.is(&captured));
    }
}
