//! Identifiers.

use std::fmt;

use ulid::Ulid;

/// Identifier of one pending queue operation.
///
/// Used to find the attempt again when its caller cancels, and in log fields.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(Ulid);

impl AttemptId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for AttemptId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_prefix() {
        let id = AttemptId::from(Ulid::nil());
        assert_eq!(id.to_string(), format!("attempt-{}", Ulid::nil()));
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(AttemptId::generate(), AttemptId::generate());
    }
}
