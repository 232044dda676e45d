//! # Bus Constants
//!
//! Environment variable names, defaults, and the process-wide identifiers that
//! every persisted record is stamped with.

use std::sync::OnceLock;
use uuid::Uuid;

/// Namespace for deterministic message-type identifiers (UUID v5 over the
/// resolved type name). Changing this value re-keys every stored message type.
pub const MESSAGE_TYPE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b3d_5c70_8e21_d4a5_b6c7_f809);

/// Environment variable names read by configuration and logging
pub mod env {
    pub const ENVIRONMENT: &str = "COURIER_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    pub const HOST_ID: &str = "COURIER_HOST_ID";
    pub const DEFAULT_TIMEOUT_MS: &str = "COURIER_DEFAULT_TIMEOUT_MS";
    pub const HANDLER_LIFETIME: &str = "COURIER_HANDLER_LIFETIME";
    pub const STRICT_INTERCEPTORS: &str = "COURIER_STRICT_INTERCEPTORS";
    pub const LOG_FORMAT: &str = "COURIER_LOG_FORMAT";
    /// Prefix used by the layered `config` loader (`COURIER_HOST_ID`, ...)
    pub const CONFIG_PREFIX: &str = "COURIER";
}

/// Default values used when configuration leaves a setting unspecified
pub mod defaults {
    pub const HOST_ID: &str = "courier-host";
    pub const ENVIRONMENT: &str = "development";
    pub const TIMEOUT_MS: u64 = 30_000;
}

/// Content type written alongside payloads produced by the JSON serializer
pub const JSON_CONTENT_TYPE: &str = "application/json";

static RUNTIME_KEY: OnceLock<Uuid> = OnceLock::new();

/// Process-wide runtime key.
///
/// Generated once per process. Log entries and envelopes carry it so that work
/// written by a previous (crashed) or concurrent instance sharing the same
/// storage can be told apart.
pub fn runtime_key() -> Uuid {
    *RUNTIME_KEY.get_or_init(Uuid::new_v4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_key_is_stable_within_process() {
        assert_eq!(runtime_key(), runtime_key());
        assert!(!runtime_key().is_nil());
    }

    #[test]
    fn test_namespace_is_not_nil() {
        assert!(!MESSAGE_TYPE_NAMESPACE.is_nil());
    }
}
