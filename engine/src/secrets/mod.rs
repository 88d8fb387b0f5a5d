//! API key lookup and secret scrubbing
//!
//! Keys are resolved from the environment first (`openai_api_key` is read from
//! `OPENAI_API_KEY`), then from the OS keychain:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (libsecret)
//!
//! Lookup never prompts; runs are non-interactive.

pub mod string;

pub use string::SecretString;

use keyring::Entry;
use regex::Regex;
use sdk::errors::EngineError;
use std::sync::OnceLock;

/// Keychain service name used for stored keys
pub const SERVICE_NAME: &str = "thinker";

/// Keys the engine knows how to use
pub const KNOWN_KEYS: &[&str] = &["openai_api_key"];

/// Regex patterns for detecting common secret formats.
static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn get_secret_patterns() -> &'static Vec<Regex> {
    SECRET_PATTERNS.get_or_init(|| {
        vec![
            // OpenAI keys, including sk-proj- and similar variants
            Regex::new(r"sk-[a-zA-Z0-9\-_]{20,}").expect("Invalid OpenAI pattern"),
            Regex::new(r"AIza[0-9A-Za-z\-_]{35}").expect("Invalid Google pattern"),
            Regex::new(r"Bearer\s+[^\s]{20,}").expect("Invalid Bearer pattern"),
            // Keys passed as query parameters, e.g. ?key=... or &api_key=...
            Regex::new(r"(?i)\b(api_?key|key|token)=[^&\s]{16,}").expect("Invalid query pattern"),
        ]
    })
}

/// Replace anything that looks like a credential with `[REDACTED]`.
///
/// Applied to every failure message before it is stored on a task, so
/// collaborator errors that echo request URLs or headers never leak keys
/// into the run report.
///
/// # Examples
/// ```
/// use thinker_engine::secrets::scrub;
///
/// let scrubbed = scrub("My API key is sk-1234567890abcdefghij");
/// assert_eq!(scrubbed, "My API key is [REDACTED]");
/// ```
pub fn scrub(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in get_secret_patterns() {
        result = pattern.replace_all(&result, "[REDACTED]").to_string();
    }
    result
}

/// Resolves API keys from the environment or the OS keychain.
pub struct SecretManager {
    service_name: String,
}

impl SecretManager {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Resolve a key, checking the upper-cased environment variable first.
    ///
    /// # Errors
    /// Returns `EngineError::KeyringError` if the key is in neither place or
    /// the keychain cannot be reached.
    pub fn get_secret(&self, key: &str) -> Result<SecretString, EngineError> {
        let env_name = key.to_uppercase();
        if let Ok(value) = std::env::var(&env_name) {
            if !value.trim().is_empty() {
                tracing::debug!("Using secret '{}' from environment", key);
                return Ok(SecretString::new(value.trim()));
            }
        }

        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(secret) => {
                tracing::debug!("Retrieved secret '{}' from keychain", key);
                Ok(SecretString::new(secret))
            }
            Err(keyring::Error::NoEntry) => Err(EngineError::KeyringError(format!(
                "'{}' not found: set {} or store it in the keychain under service '{}'",
                key, env_name, self.service_name
            ))),
            Err(e) => Err(EngineError::KeyringError(format!(
                "Failed to retrieve secret '{}': {}",
                key, e
            ))),
        }
    }

    /// Stores a secret in the OS keychain.
    pub fn set_secret(&self, key: &str, value: &str) -> Result<(), EngineError> {
        if value.trim().is_empty() {
            return Err(EngineError::KeyringError(
                "Secret cannot be empty".to_string(),
            ));
        }

        self.entry(key)?.set_password(value).map_err(|e| {
            EngineError::KeyringError(format!("Failed to store secret '{}': {}", key, e))
        })?;

        tracing::info!("Stored secret '{}' in keychain", key);
        Ok(())
    }

    /// Deletes a secret from the OS keychain.
    pub fn delete_secret(&self, key: &str) -> Result<(), EngineError> {
        self.entry(key)?.delete_password().map_err(|e| {
            EngineError::KeyringError(format!("Failed to delete secret '{}': {}", key, e))
        })?;

        tracing::info!("Deleted secret '{}' from keychain", key);
        Ok(())
    }

    /// Whether the key resolves from either source
    pub fn has_secret(&self, key: &str) -> bool {
        self.get_secret(key).is_ok()
    }

    fn entry(&self, key: &str) -> Result<Entry, EngineError> {
        Entry::new(&self.service_name, key).map_err(|e| {
            EngineError::KeyringError(format!("Failed to create keyring entry: {}", e))
        })
    }
}

impl Default for SecretManager {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}
