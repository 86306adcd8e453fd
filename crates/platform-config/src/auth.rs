use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

const E164_PATTERN: &str = r"^\+[1-9][0-9]{1,14}$";

/// Sign-in methods offered by the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthProviderConfig {
    #[serde(default)]
    pub email_password: EmailPasswordConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub phone: PhoneConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPasswordConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub require_email_verification: bool,
    #[serde(default = "default_true")]
    pub allow_password_reset: bool,
}

impl Default for EmailPasswordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_email_verification: true,
            allow_password_reset: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhoneConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Numbers that receive fixed verification codes, for testing only.
    #[serde(default)]
    pub test_phone_numbers: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInMethod {
    EmailPassword,
    Google,
    Phone,
}

impl SignInMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignInMethod::EmailPassword => "email_password",
            SignInMethod::Google => "google",
            SignInMethod::Phone => "phone",
        }
    }
}

impl fmt::Display for SignInMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthProviderConfig {
    pub fn enabled_methods(&self) -> Vec<SignInMethod> {
        let mut methods = Vec::new();
        if self.email_password.enabled {
            methods.push(SignInMethod::EmailPassword);
        }
        if self.google.enabled {
            methods.push(SignInMethod::Google);
        }
        if self.phone.enabled {
            methods.push(SignInMethod::Phone);
        }
        methods
    }

    /// Check cross-field constraints.
    ///
    /// Test phone numbers are checked even while phone sign-in is disabled,
    /// so a bad entry is caught before the method is switched on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_methods().is_empty() {
            return Err(ConfigError::NoSignInMethod);
        }

        if self.google.enabled {
            let client_id = self.google.client_id.as_deref().unwrap_or("").trim();
            if client_id.is_empty() || is_placeholder(client_id) {
                return Err(ConfigError::PlaceholderClientId {
                    client_id: client_id.to_string(),
                });
            }
        }

        let e164 = Regex::new(E164_PATTERN)?;
        if let Some(bad) = self
            .phone
            .test_phone_numbers
            .iter()
            .find(|n| !e164.is_match(n))
        {
            return Err(ConfigError::InvalidPhoneNumber {
                number: bad.clone(),
            });
        }

        Ok(())
    }
}

fn is_placeholder(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("your-") || lower.starts_with("your_") || lower.contains("changeme")
}

/// Load and validate an [`AuthProviderConfig`] from a YAML file.
pub fn load_auth_config(path: impl AsRef<Path>) -> Result<AuthProviderConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read auth config: {}", path.display()))?;
    let config = auth_config_from_str(&contents)
        .with_context(|| format!("invalid auth config: {}", path.display()))?;
    debug!(path = %path.display(), methods = ?config.enabled_methods(), "auth config loaded");
    Ok(config)
}

pub fn auth_config_from_str(yaml: &str) -> Result<AuthProviderConfig> {
    let config: AuthProviderConfig =
        serde_yml::from_str(yaml).context("YAML deserialization failed")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_enables_email_only() {
        let config = auth_config_from_str(include_str!("../../../config/auth.yaml")).unwrap();
        assert_eq!(config.enabled_methods(), vec![SignInMethod::EmailPassword]);
        assert!(config.email_password.require_email_verification);
        assert_eq!(config.phone.test_phone_numbers, vec!["+1234567890"]);
    }

    #[test]
    fn e164_pattern_compiles() {
        Regex::new(E164_PATTERN).unwrap();
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = auth_config_from_str("{}").unwrap();
        assert_eq!(config, AuthProviderConfig::default());
    }

    #[test]
    fn all_methods_disabled_is_rejected() {
        let err = auth_config_from_str("email_password: { enabled: false }").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NoSignInMethod)
        ));
    }

    #[test]
    fn google_needs_real_client_id() {
        let yaml = "google: { enabled: true, client_id: your-google-client-id }";
        let err = auth_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("placeholder"), "{err}");

        let yaml = "google: { enabled: true }";
        assert!(auth_config_from_str(yaml).is_err());

        let yaml = "google: { enabled: true, client_id: 1234.apps.example.com }";
        let config = auth_config_from_str(yaml).unwrap();
        assert_eq!(
            config.enabled_methods(),
            vec![SignInMethod::EmailPassword, SignInMethod::Google]
        );
    }

    #[test]
    fn phone_numbers_must_be_e164() {
        let yaml = r#"phone: { enabled: true, test_phone_numbers: ["555-0100"] }"#;
        let err = auth_config_from_str(yaml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidPhoneNumber { number }) if number == "555-0100"
        ));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(auth_config_from_str("facebook: { enabled: true }").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.yaml");
        std::fs::write(&path, "phone: { enabled: true }").unwrap();
        let config = load_auth_config(&path).unwrap();
        assert_eq!(config.enabled_methods().len(), 2);

        let err = load_auth_config(dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("failed to read auth config"));
    }
}
