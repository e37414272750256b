//! Strongly-typed payload identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::PayloadCategory;
use crate::error::DomainError;

/// Identifier of a retained payload: `<CATEGORY>_<token>`.
///
/// The identifier doubles as the durable storage key, so parsing rejects
/// anything that could escape a storage directory (only ASCII alphanumerics,
/// `-` and `_` are accepted in the token).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PayloadId(String);

impl PayloadId {
    /// Create a new identifier for the given category.
    ///
    /// The token is a UUIDv7 (time-ordered) in simple form.
    pub fn generate(category: PayloadCategory) -> Self {
        Self(format!("{}_{}", category.as_str(), Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The category encoded in the identifier prefix.
    pub fn category(&self) -> PayloadCategory {
        // Parsing guarantees a valid prefix.
        self.0
            .split_once('_')
            .and_then(|(prefix, _)| prefix.parse().ok())
            .unwrap_or(PayloadCategory::Analytics)
    }
}

impl core::fmt::Display for PayloadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PayloadId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, token) = s
            .split_once('_')
            .ok_or_else(|| DomainError::invalid_id(format!("PayloadId: missing separator in {s:?}")))?;

        prefix
            .parse::<PayloadCategory>()
            .map_err(|e| DomainError::invalid_id(format!("PayloadId: {e}")))?;

        if token.is_empty() {
            return Err(DomainError::invalid_id("PayloadId: empty token"));
        }
        if !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::invalid_id(format!(
                "PayloadId: illegal character in token {token:?}"
            )));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for PayloadId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PayloadId> for String {
    fn from(value: PayloadId) -> Self {
        value.0
    }
}

impl AsRef<str> for PayloadId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
