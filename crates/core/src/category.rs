//! Payload categories.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Classification of a retained telemetry payload.
///
/// The category drives both retry priority and eviction priority in the
/// offline cache. It is fixed when the payload is created.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PayloadCategory {
    /// Timer/page analytics beacons (the default collector endpoint).
    #[serde(rename = "ANALYTICS")]
    Analytics,
    /// Captured network request ("WCD") batches.
    #[serde(rename = "WCD")]
    Wcd,
    /// Error, crash and ANR reports.
    #[serde(rename = "ERROR")]
    Error,
}

/// Path fragment identifying the error-report collector.
const ERROR_PATH_MARKER: &str = "err.rcv";
/// Path fragment identifying the captured-request collector.
const WCD_PATH_MARKER: &str = "wcd.rcb";

impl PayloadCategory {
    pub const ALL: [PayloadCategory; 3] = [Self::Analytics, Self::Wcd, Self::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analytics => "ANALYTICS",
            Self::Wcd => "WCD",
            Self::Error => "ERROR",
        }
    }

    /// Classify a collector URL by the shape of its path.
    ///
    /// Producers that know what they are sending should pass the category
    /// explicitly; this exists for call sites that only hold a request URL.
    /// Only the path is inspected (query and fragment are ignored), and
    /// anything unrecognised is analytics.
    pub fn infer_from_url(url: &str) -> Self {
        let path = url_path(url);
        if path.contains(ERROR_PATH_MARKER) {
            Self::Error
        } else if path.contains(WCD_PATH_MARKER) {
            Self::Wcd
        } else {
            Self::Analytics
        }
    }
}

/// Extract the path portion of an absolute or relative URL.
fn url_path(url: &str) -> &str {
    let without_suffix = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url);

    match without_suffix.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |idx| &rest[idx..]),
        None => without_suffix,
    }
}

impl core::fmt::Display for PayloadCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadCategory {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANALYTICS" => Ok(Self::Analytics),
            "WCD" => Ok(Self::Wcd),
            "ERROR" => Ok(Self::Error),
            other => Err(DomainError::validation(format!(
                "unknown payload category: {other}"
            ))),
        }
    }
}
