use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingTarget,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    BuildToolUnavailable,
    BuildFailed,
    BuildManifestInvalid,

    AddressNotFound,

    TunnelEstablishFailed,
    TunnelRelayUnreachable,

    TagFailed,
    PushFailed,

    VerifyArtifactMissing,
    VerifyQueryFailed,

    RemoteStageFailed,
    RemoteApplyFailed,
    RemotePruneFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

/// Failure families a run can abort with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Config,
    Build,
    AddressDiscovery,
    Tunnel,
    Push,
    Verification,
    RemoteApply,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingTarget => "config.missing_target",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::BuildToolUnavailable => "build.tool_unavailable",
            ErrorCode::BuildFailed => "build.failed",
            ErrorCode::BuildManifestInvalid => "build.manifest_invalid",

            ErrorCode::AddressNotFound => "address.not_found",

            ErrorCode::TunnelEstablishFailed => "tunnel.establish_failed",
            ErrorCode::TunnelRelayUnreachable => "tunnel.relay_unreachable",

            ErrorCode::TagFailed => "tag.failed",
            ErrorCode::PushFailed => "push.failed",

            ErrorCode::VerifyArtifactMissing => "verify.artifact_missing",
            ErrorCode::VerifyQueryFailed => "verify.query_failed",

            ErrorCode::RemoteStageFailed => "remote.stage_failed",
            ErrorCode::RemoteApplyFailed => "remote.apply_failed",
            ErrorCode::RemotePruneFailed => "remote.prune_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorCode::ConfigMissingTarget
            | ErrorCode::ConfigInvalidJson
            | ErrorCode::ConfigInvalidValue
            | ErrorCode::ValidationInvalidArgument => ErrorClass::Config,

            ErrorCode::BuildToolUnavailable
            | ErrorCode::BuildFailed
            | ErrorCode::BuildManifestInvalid
            | ErrorCode::TagFailed => ErrorClass::Build,

            ErrorCode::AddressNotFound => ErrorClass::AddressDiscovery,

            ErrorCode::TunnelEstablishFailed | ErrorCode::TunnelRelayUnreachable => {
                ErrorClass::Tunnel
            }

            ErrorCode::PushFailed => ErrorClass::Push,

            ErrorCode::VerifyArtifactMissing | ErrorCode::VerifyQueryFailed => {
                ErrorClass::Verification
            }

            ErrorCode::RemoteStageFailed
            | ErrorCode::RemoteApplyFailed
            | ErrorCode::RemotePruneFailed => ErrorClass::RemoteApply,

            ErrorCode::InternalIoError
            | ErrorCode::InternalJsonError
            | ErrorCode::InternalUnexpected => ErrorClass::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Output of an external tool that ran and reported failure.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFailedDetails {
    pub command: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUnavailableDetails {
    pub program: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressNotFoundDetails {
    pub considered: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelDetails {
    pub host: String,
    pub user: String,
    pub bind: String,
    pub port: u16,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayDetails {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    pub fn config_missing_target() -> Self {
        Self::new(
            ErrorCode::ConfigMissingTarget,
            "No target host given",
            serde_json::json!({ "field": "target_host" }),
        )
        .with_hint("Usage: airlift deploy <TARGET_HOST> [--user root] [--port 5000]")
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigInvalidJsonDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem: problem.into(),
                id,
            }),
        )
    }

    pub fn build_tool_unavailable(program: impl Into<String>, error: impl Into<String>) -> Self {
        let program = program.into();
        Self::new(
            ErrorCode::BuildToolUnavailable,
            format!("Image builder '{}' is not available", program),
            to_details(ToolUnavailableDetails {
                program,
                error: error.into(),
            }),
        )
        .with_hint("Install Docker with the compose plugin, or set docker.binary in airlift.json")
    }

    pub fn build_failed(details: ToolFailedDetails) -> Self {
        Self::new(ErrorCode::BuildFailed, "Image build failed", to_details(details))
    }

    pub fn build_manifest_invalid(path: impl Into<String>, problem: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::BuildManifestInvalid,
            format!("Build manifest '{}' could not be read", path),
            serde_json::json!({ "path": path, "problem": problem.into() }),
        )
    }

    pub fn address_not_found(considered: Vec<String>, subnet: Option<String>) -> Self {
        Self::new(
            ErrorCode::AddressNotFound,
            "No usable local network address found",
            to_details(AddressNotFoundDetails { considered, subnet }),
        )
        .with_hint("Run 'airlift addresses' to see which interfaces were considered")
    }

    pub fn tunnel_establish_failed(details: TunnelDetails) -> Self {
        Self::new(
            ErrorCode::TunnelEstablishFailed,
            format!("Could not open tunnel to {}", details.host),
            to_details(details),
        )
    }

    pub fn tunnel_relay_unreachable(details: RelayDetails) -> Self {
        Self::new(
            ErrorCode::TunnelRelayUnreachable,
            format!("Relay at {} is not reachable through the tunnel", details.endpoint),
            to_details(details),
        )
        .with_hint("Check that the registry is running on the target host")
    }

    pub fn tag_failed(alias: impl Into<String>, details: ToolFailedDetails) -> Self {
        Self::new(
            ErrorCode::TagFailed,
            format!("Could not tag image as {}", alias.into()),
            to_details(details),
        )
    }

    pub fn push_failed(relay_name: impl Into<String>, details: ToolFailedDetails) -> Self {
        Self::new(
            ErrorCode::PushFailed,
            format!("Push of {} failed", relay_name.into()),
            to_details(details),
        )
    }

    pub fn verify_artifact_missing(details: RelayDetails) -> Self {
        let name = details.relay_name.clone().unwrap_or_default();
        Self::new(
            ErrorCode::VerifyArtifactMissing,
            format!("{} is missing from the relay after push", name),
            to_details(details),
        )
    }

    pub fn verify_query_failed(details: RelayDetails) -> Self {
        Self::new(
            ErrorCode::VerifyQueryFailed,
            format!("Relay listing query against {} failed", details.endpoint),
            to_details(details),
        )
    }

    pub fn remote_stage_failed(message: impl Into<String>, details: Value) -> Self {
        Self::new(ErrorCode::RemoteStageFailed, message, details)
    }

    pub fn remote_apply_failed(details: ToolFailedDetails) -> Self {
        Self::new(
            ErrorCode::RemoteApplyFailed,
            "Remote orchestration failed",
            to_details(details),
        )
    }

    pub fn remote_prune_failed(details: ToolFailedDetails) -> Self {
        Self::new(
            ErrorCode::RemotePruneFailed,
            "Remote prune failed",
            to_details(details),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Attach an extra key to the details object.
    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        if !self.details.is_object() {
            self.details = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value);
        }
        self
    }
}
