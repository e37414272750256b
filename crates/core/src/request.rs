//! Outbound collector requests.
//!
//! An [`OutboundRequest`] is the opaque unit the uploader sends. The offline
//! cache stores it verbatim and hands it back; nothing here interprets the body.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::category::PayloadCategory;

/// Request header map. Ordered so encodings are stable.
pub type Headers = BTreeMap<String, String>;

/// HTTP method of an outbound request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl core::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A telemetry request addressed to a collector endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Raw body bytes (base64 in serialized form).
    #[serde(default, with = "base64_body", skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: None,
            body: None,
        }
    }

    /// Build a request whose body is the JSON encoding of `model`.
    pub fn json<T: Serialize>(
        method: HttpMethod,
        url: impl Into<String>,
        model: &T,
    ) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(model)?;
        Ok(Self::new(method, url).with_body(body))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Body length in bytes (0 when absent).
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }

    /// Category implied by the target URL.
    pub fn inferred_category(&self) -> PayloadCategory {
        PayloadCategory::infer_from_url(&self.url)
    }
}

mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match body {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
