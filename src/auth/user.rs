use std::fmt;
use std::str::FromStr;

use crate::error::CIPulseError;

/// Stable identifier of the signed-in user, as issued by the identity provider.
///
/// The dashboard endpoints are keyed by this value, so it is kept verbatim
/// apart from surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = CIPulseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CIPulseError::Config(
                "User id must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_parses_and_trims() {
        let user: UserId = " github|12345 ".parse().unwrap();

        assert_eq!(user.as_str(), "github|12345");
        assert_eq!(user.to_string(), "github|12345");
    }

    #[test]
    fn test_empty_user_id_is_rejected() {
        let err = "   ".parse::<UserId>().unwrap_err();

        assert!(matches!(err, CIPulseError::Config(_)));
    }

    #[test]
    fn test_user_ids_compare_by_value() {
        let a: UserId = "user-1".parse().unwrap();
        let b: UserId = "user-1".parse().unwrap();
        let c: UserId = "user-2".parse().unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
