#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! Machine-readable output for the command surface.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Current version of every `trunkguard://` response schema.
pub const SCHEMA_VERSION: &str = "1.0";

/// Output format selected with `--json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    #[default]
    Human,
}

impl OutputFormat {
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }

    #[must_use]
    pub const fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Human
        }
    }
}

/// Versioned wrapper around every JSON response.
///
/// `data` is flattened, so it must serialize as an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEnvelope<T> {
    #[serde(rename = "$schema")]
    pub schema: String,
    #[serde(rename = "_schema_version")]
    pub schema_version: String,
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T> SchemaEnvelope<T> {
    /// Successful response of kind `name`, e.g. `submit-response`.
    pub fn new(name: &str, data: T) -> Self {
        Self {
            schema: format!("trunkguard://{name}/v1"),
            schema_version: SCHEMA_VERSION.to_string(),
            success: true,
            data,
        }
    }
}

/// Payload of a failed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: ErrorBody,
}

impl SchemaEnvelope<ErrorPayload> {
    pub fn error(err: &Error) -> Self {
        Self {
            success: false,
            ..Self::new(
                "error-response",
                ErrorPayload {
                    error: ErrorBody {
                        code: err.code().to_string(),
                        message: err.to_string(),
                        exit_code: err.exit_code(),
                    },
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct Submitted {
        id: String,
    }

    #[test]
    fn test_envelope_flattens_data() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(SchemaEnvelope::new(
            "submit-response",
            Submitted { id: "r1".into() },
        ))?;
        assert_eq!(
            value,
            json!({
                "$schema": "trunkguard://submit-response/v1",
                "_schema_version": "1.0",
                "success": true,
                "id": "r1",
            })
        );
        Ok(())
    }

    #[test]
    fn test_error_envelope_carries_exit_code() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(SchemaEnvelope::<ErrorPayload>::error(&Error::branch_not_found("feat")))?;
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "BRANCH_NOT_FOUND");
        assert_eq!(value["error"]["exit_code"], 1);
        Ok(())
    }

    #[test]
    fn test_json_flag() {
        assert!(OutputFormat::from_json_flag(true).is_json());
        assert!(!OutputFormat::from_json_flag(false).is_json());
    }
}
