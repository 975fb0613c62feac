//! Request and response types for the channel boundary
//!
//! These types are serialized as JSON by the `serve` command and can be used
//! by any host that drives the channel over a message boundary. Binary
//! payloads travel base64-encoded.

use std::path::PathBuf;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// One boundary operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    EnsureKeypairAvailable { user_id: String },
    #[serde(rename_all = "camelCase")]
    EncryptAttachment {
        /// Base64 plaintext
        data: String,
        recipient_id: String,
    },
    /// Exactly one of `data` (base64 ciphertext) or `path` must be set.
    #[serde(rename_all = "camelCase")]
    DecryptAttachment {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    #[serde(rename_all = "camelCase")]
    ReceivedPubKey {
        contact_id: String,
        public_key: String,
    },
    #[serde(rename_all = "camelCase")]
    TestContactKeyAvailable { contact_id: String },
}

impl Request {
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::EnsureKeypairAvailable { .. } => "EnsureKeypairAvailable",
            Self::EncryptAttachment { .. } => "EncryptAttachment",
            Self::DecryptAttachment { .. } => "DecryptAttachment",
            Self::ReceivedPubKey { .. } => "ReceivedPubKey",
            Self::TestContactKeyAvailable { .. } => "TestContactKeyAvailable",
        }
    }
}

/// Successful result payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ResponseBody {
    #[serde(rename_all = "camelCase")]
    PublicKey { user_id: String, public_key: String },
    #[serde(rename_all = "camelCase")]
    Ciphertext {
        recipient_id: String,
        armored: String,
    },
    #[serde(rename_all = "camelCase")]
    Plaintext {
        /// Base64 plaintext
        data: String,
        signed_by: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DecryptedFile {
        path: PathBuf,
        signed_by: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ContactKeyRegistered {
        contact_id: String,
        already_present: bool,
    },
    #[serde(rename_all = "camelCase")]
    ContactKeyAvailable { contact_id: String, available: bool },
}

impl ResponseBody {
    pub fn plaintext(bytes: &[u8], signed_by: Option<String>) -> Self {
        Self::Plaintext {
            data: general_purpose::STANDARD.encode(bytes),
            signed_by,
        }
    }
}

/// Either a result or an error, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok { result: ResponseBody },
    Error { error: ApiError },
}

impl Response {
    pub fn ok(result: ResponseBody) -> Self {
        Self::Ok { result }
    }

    pub fn error(error: impl Into<ApiError>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// API error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// A request line that could not be parsed at all.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new("INVALID_REQUEST", message)
    }
}

impl From<&ChannelError> for ApiError {
    fn from(err: &ChannelError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<ChannelError> for ApiError {
    fn from(err: ChannelError) -> Self {
        Self::from(&err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Decode a base64 request field.
pub fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, ChannelError> {
    general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| ChannelError::InvalidRequest(format!("{} is not valid base64: {}", field, e)))
}
