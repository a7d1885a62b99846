//! Document identifiers.
//!
//! Ids are 32 lowercase hex characters (a v4 UUID without separators). The
//! source database may hand out its own ids; validation only rejects values
//! that cannot safely appear inside a cache key.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("ID must not be empty")]
    Empty,
    #[error("ID exceeds {max} characters")]
    TooLong { max: usize },
    #[error("ID contains invalid character {0:?}")]
    InvalidChar(char),
}

const MAX_ID_LEN: usize = 64;

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn validate_id(id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty);
    }
    if id.len() > MAX_ID_LEN {
        return Err(IdError::TooLong { max: MAX_ID_LEN });
    }
    match id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        Some(c) => Err(IdError::InvalidChar(c)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_and_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(validate_id(&a).is_ok());
    }

    #[test]
    fn rejects_unsafe_ids() {
        assert_eq!(validate_id(""), Err(IdError::Empty));
        assert_eq!(validate_id("a&b"), Err(IdError::InvalidChar('&')));
        assert_eq!(
            validate_id(&"x".repeat(65)),
            Err(IdError::TooLong { max: 64 })
        );
        assert!(validate_id("64f1c2ab9e_state-1").is_ok());
    }
}
