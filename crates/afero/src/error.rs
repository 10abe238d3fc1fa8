//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use afero_config::ConfigError;
use afero_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the Afero cloud: {reason}")]
    #[diagnostic(
        code(afero::connection_failed),
        help("Check your network connection, or retry with -vv for request details.")
    )]
    ConnectionFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {reason}")]
    #[diagnostic(
        code(afero::auth_failed),
        help(
            "The refresh token was rejected or has expired.\n\
             Provide a new one with --refresh-token or AFERO_REFRESH_TOKEN."
        )
    )]
    AuthFailed { reason: String },

    #[error("No refresh token configured for profile '{profile}'")]
    #[diagnostic(
        code(afero::no_credentials),
        help(
            "Set refresh_token or refresh_token_env in the profile,\n\
             or pass --refresh-token / AFERO_REFRESH_TOKEN."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(afero::not_found),
        help("Run: afero devices get <device> to see available functions")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    // ── Commands ─────────────────────────────────────────────────────

    #[error("Command failed: {message}")]
    #[diagnostic(code(afero::command_failed))]
    CommandFailed { message: String },

    #[error("Command was not confirmed in time: {message}")]
    #[diagnostic(
        code(afero::timeout),
        help("The device value was restored. The device may be offline.")
    )]
    Timeout { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(afero::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(afero::profile_not_found),
        help("Define [profiles.{name}] in {path}")
    )]
    ProfileNotFound { name: String, path: String },

    #[error(transparent)]
    #[diagnostic(code(afero::config))]
    Config(ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    #[diagnostic(code(afero::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(afero::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                path: afero_config::config_path().display().to_string(),
            },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        if err.is_auth_failure() {
            return CliError::AuthFailed {
                reason: err.to_string(),
            };
        }

        match err {
            CoreError::Transport(e) => CliError::ConnectionFailed {
                reason: e.to_string(),
            },

            CoreError::Auth(e) => CliError::ConnectionFailed {
                reason: e.to_string(),
            },

            CoreError::DeviceNotFound { device_id } => CliError::NotFound {
                resource_type: "device".into(),
                identifier: device_id,
            },

            CoreError::ResourceNotFound {
                device_id,
                resource_id,
            } => CliError::NotFound {
                resource_type: "resource".into(),
                identifier: format!("{device_id}/{resource_id}"),
            },

            CoreError::FunctionNotFound { target } => CliError::NotFound {
                resource_type: "function".into(),
                identifier: target,
            },

            CoreError::DomainViolation { target, reason } => CliError::Validation {
                field: target,
                reason: reason.to_string(),
            },

            err @ CoreError::CommandFailed { .. } if err.to_string().contains("no confirmation") => {
                CliError::Timeout {
                    message: err.to_string(),
                }
            }

            err @ (CoreError::CommandFailed { .. } | CoreError::Cancelled { .. }) => {
                CliError::CommandFailed {
                    message: err.to_string(),
                }
            }

            CoreError::Config { message } => CliError::Validation {
                field: "configuration".into(),
                reason: message,
            },

            err @ (CoreError::MalformedPayload { .. }
            | CoreError::BridgeStopped
            | CoreError::Internal(_)) => CliError::Internal(err.to_string()),
        }
    }
}
