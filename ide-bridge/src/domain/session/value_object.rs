use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier for one streaming connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|err| format!("invalid session id {value:?}: {err}"))
    }
}

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(D::Error::custom)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    Missing,
    #[error("authorization token mismatch")]
    Mismatch,
}

/// Process-lifetime shared secret presented by clients in the `Authorization` header.
#[derive(Clone)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err("auth token cannot be empty".to_string());
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts either `<token>` or `Bearer <token>`.
    pub fn verify_header(&self, header: Option<&str>) -> Result<(), AuthError> {
        let header = header.ok_or(AuthError::Missing)?;
        let provided = header.strip_prefix("Bearer ").unwrap_or(header);
        if provided.as_bytes().ct_eq(self.0.as_bytes()).into() {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_wraps_uuid() {
        let uuid = Uuid::new_v4();
        let session = SessionId::from_uuid(uuid);
        assert_eq!(uuid, session.as_uuid());
        assert_eq!(uuid.to_string(), session.to_string());
        assert_eq!(session, session.to_string().parse().unwrap());
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn token_accepts_raw_and_bearer_forms() {
        let token = AuthToken::new("s3cret").unwrap();
        assert!(token.verify_header(Some("s3cret")).is_ok());
        assert!(token.verify_header(Some("Bearer s3cret")).is_ok());
    }

    #[test]
    fn token_rejects_missing_and_mismatched_headers() {
        let token = AuthToken::new("s3cret").unwrap();
        assert_eq!(token.verify_header(None), Err(AuthError::Missing));
        assert_eq!(token.verify_header(Some("nope")), Err(AuthError::Mismatch));
        assert_eq!(
            token.verify_header(Some("Bearer s3cret ")),
            Err(AuthError::Mismatch)
        );
        assert_eq!(token.verify_header(Some("")), Err(AuthError::Mismatch));
    }

    #[test]
    fn generated_tokens_are_unique_and_redacted() {
        let first = AuthToken::generate();
        let second = AuthToken::generate();
        assert_ne!(first.as_str(), second.as_str());
        assert_eq!(format!("{first:?}"), "AuthToken(***)");
        assert!(AuthToken::new("  ").is_err());
    }
}
