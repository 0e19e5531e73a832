use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    EnvironmentNetworkUnreachable,
    EnvironmentToolMissing,
    EnvironmentRemoteMissing,
    EnvironmentCheckFailed,

    LockContention,
    LockWriteFailed,

    CommandSpawnFailed,
    CommandTimeout,

    GenerationFailed,

    SyncAuthFailed,
    SyncFailed,

    CredentialsCheckFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::EnvironmentNetworkUnreachable => "environment.network_unreachable",
            ErrorCode::EnvironmentToolMissing => "environment.tool_missing",
            ErrorCode::EnvironmentRemoteMissing => "environment.remote_missing",
            ErrorCode::EnvironmentCheckFailed => "environment.check_failed",

            ErrorCode::LockContention => "lock.contention",
            ErrorCode::LockWriteFailed => "lock.write_failed",

            ErrorCode::CommandSpawnFailed => "command.spawn_failed",
            ErrorCode::CommandTimeout => "command.timeout",

            ErrorCode::GenerationFailed => "generation.failed",

            ErrorCode::SyncAuthFailed => "sync.auth_failed",
            ErrorCode::SyncFailed => "sync.failed",

            ErrorCode::CredentialsCheckFailed => "credentials.check_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
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
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockContentionDetails {
    pub path: String,
    pub holder: String,
}

/// Details for a failed external command. Carries the description, never the
/// command line, since command lines may embed credentials.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub description: String,
    pub exit_code: i32,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn empty_details() -> Value {
    Value::Object(serde_json::Map::new())
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

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
        })
        .unwrap_or_else(|_| empty_details());

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = serde_json::to_value(ConfigInvalidJsonDetails {
            path: path.into(),
            error: err.to_string(),
        })
        .unwrap_or_else(|_| empty_details());

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        })
        .unwrap_or_else(|_| empty_details());

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn environment(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, empty_details())
    }

    pub fn lock_contention(path: impl Into<String>, holder: impl Into<String>) -> Self {
        let details = serde_json::to_value(LockContentionDetails {
            path: path.into(),
            holder: holder.into(),
        })
        .unwrap_or_else(|_| empty_details());

        Self::new(
            ErrorCode::LockContention,
            "Another sync run holds the lock",
            details,
        )
        .with_hint("Wait for the other run to finish, or rerun with --force")
    }

    pub fn lock_write_failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        let details = serde_json::to_value(InternalIoErrorDetails {
            error: error.into(),
            context: Some(path.into()),
        })
        .unwrap_or_else(|_| empty_details());

        Self::new(ErrorCode::LockWriteFailed, "Could not create lock", details)
    }

    pub fn command_spawn_failed(description: impl Into<String>, error: impl Into<String>) -> Self {
        let details = serde_json::to_value(CommandFailedDetails {
            description: description.into(),
            exit_code: -1,
            stderr: error.into(),
        })
        .unwrap_or_else(|_| empty_details());

        Self::new(
            ErrorCode::CommandSpawnFailed,
            "Failed to start command",
            details,
        )
    }

    pub fn command_timeout(description: impl Into<String>, timeout_secs: u64) -> Self {
        Self::new(
            ErrorCode::CommandTimeout,
            format!("Command timed out after {}s", timeout_secs),
            serde_json::json!({ "description": description.into(), "timeoutSecs": timeout_secs }),
        )
    }

    pub fn generation_failed(message: impl Into<String>, details: CommandFailedDetails) -> Self {
        let details = serde_json::to_value(details).unwrap_or_else(|_| empty_details());
        Self::new(ErrorCode::GenerationFailed, message, details)
    }

    pub fn sync_failed(details: CommandFailedDetails) -> Self {
        let message = format!("{} failed", details.description);
        let details = serde_json::to_value(details).unwrap_or_else(|_| empty_details());
        Self::new(ErrorCode::SyncFailed, message, details)
    }

    pub fn sync_auth_failed(details: CommandFailedDetails) -> Self {
        let details = serde_json::to_value(details).unwrap_or_else(|_| empty_details());
        Self::new(
            ErrorCode::SyncAuthFailed,
            "Push rejected: authentication or repository access failed",
            details,
        )
    }

    pub fn credentials_check_failed(message: impl Into<String>, details: Value) -> Self {
        Self::new(ErrorCode::CredentialsCheckFailed, message, details)
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::to_value(InternalIoErrorDetails {
            error: error.into(),
            context,
        })
        .unwrap_or_else(|_| empty_details());

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::to_value(InternalIoErrorDetails {
            error: error.into(),
            context,
        })
        .unwrap_or_else(|_| empty_details());

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
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

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}
