//! Wire types for the update server

use serde::{Deserialize, Serialize};

/// Query string of every update route. Fields are optional so a missing
/// one can be reported by name instead of as a generic rejection.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateQuery {
    pub version: Option<String>,
    pub arch: Option<String>,
    pub os: Option<String>,
}

/// What a route adds on top of plain bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCapabilities {
    pub include_diff: bool,
    pub include_signature: bool,
}

impl UpdateCapabilities {
    pub const FULL: Self = Self {
        include_diff: false,
        include_signature: false,
    };
    pub const DIFF: Self = Self {
        include_diff: true,
        include_signature: false,
    };
    pub const SIGNED_FULL: Self = Self {
        include_diff: false,
        include_signature: true,
    };
    pub const SIGNED_DIFF: Self = Self {
        include_diff: true,
        include_signature: true,
    };

    pub fn route_prefix(&self) -> &'static str {
        match (self.include_diff, self.include_signature) {
            (false, false) => "update",
            (true, false) => "patch-update",
            (false, true) => "signed-update",
            (true, true) => "signed-patch-update",
        }
    }
}

/// Body of the signed routes. `patch` holds either the full binary or a
/// delta; `sha256` and `signature` always cover the full new binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUpdateEnvelope {
    #[serde(with = "base64_bytes")]
    pub patch: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub sha256: String,
}

/// `PUT /upload/{name}` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadData {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub version: String,
    pub arch: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub signature: Option<Vec<u8>>,
    #[serde(
        rename = "signature-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signature_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
}

/// Shown alongside every upload rejection
pub fn upload_example() -> serde_json::Value {
    serde_json::json!({
        "data": "base64-encoded-binary",
        "version": "v0.0.1",
        "arch": "amd64",
        "os": "linux",
        "signature": "base64-encoded-der-ecdsa-signature-of-the-binary",
        "signature-type": "ecdsa",
    })
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.filter(|t| !t.is_empty())
            .map(|t| STANDARD.decode(t.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
