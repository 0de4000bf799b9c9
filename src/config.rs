//! Configuration types.
//!
//! Everything is read once at startup by [`AppConfig::from_env`] and passed
//! down explicitly; nothing reads the environment at call time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default completeness / confidence threshold.
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Hard-coded number for life-threatening emergencies.
pub const EMERGENCY_NUMBER: &str = "112";

/// Score thresholds for the quality gates. A score strictly below its
/// threshold is "low"; a score equal to it passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub completeness: f32,
    pub confidence: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            completeness: DEFAULT_THRESHOLD,
            confidence: DEFAULT_THRESHOLD,
        }
    }
}

/// Communication guidelines handed to the tone reviewer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Guidelines(Option<Arc<str>>);

impl Guidelines {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.trim().is_empty() {
            Self(None)
        } else {
            Self(Some(Arc::from(text)))
        }
    }

    pub fn absent() -> Self {
        Self(None)
    }

    /// The guidelines text, or `None` when missing or blank.
    pub fn text(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }
}

/// Read-only configuration shared by every turn.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub thresholds: Thresholds,
    /// Channel users are pointed to in an emergency (e.g. a WhatsApp number).
    pub emergency_contact: String,
    /// Who users are told to contact to confirm information.
    pub authority: String,
    pub guidelines: Guidelines,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            emergency_contact: "the Red Cross helpline".to_string(),
            authority: "the Red Cross".to_string(),
            guidelines: Guidelines::absent(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Skip the stdin REPL and only serve HTTP.
    pub headless: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            headless: false,
        }
    }
}

/// Session history settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions idle for longer than this are dropped.
    pub idle_timeout: Duration,
    /// Maximum history entries kept per session.
    pub max_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(3600), // 1 hour
            max_history: 20,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub router: RouterConfig,
    pub server: ServerConfig,
    pub sessions: SessionConfig,
    /// JSON document list for the knowledge index; built-in sample corpus if unset.
    pub corpus_path: Option<PathBuf>,
    pub web_fallback: bool,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = match get("AID_ASSIST_LLM_BACKEND").as_deref() {
            None | Some("anthropic") => LlmBackend::Anthropic,
            Some("openai") => LlmBackend::OpenAi,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "AID_ASSIST_LLM_BACKEND".into(),
                    message: format!("unknown backend '{other}' (expected anthropic or openai)"),
                });
            }
        };

        let api_key = get(backend.api_key_var())
            .ok_or_else(|| ConfigError::MissingEnvVar(backend.api_key_var().to_string()))?;
        let model = get("AID_ASSIST_MODEL").unwrap_or_else(|| backend.default_model().to_string());

        let thresholds = Thresholds {
            completeness: parse_threshold(
                "AID_ASSIST_COMPLETENESS_THRESHOLD",
                get("AID_ASSIST_COMPLETENESS_THRESHOLD"),
            )?,
            confidence: parse_threshold(
                "AID_ASSIST_CONFIDENCE_THRESHOLD",
                get("AID_ASSIST_CONFIDENCE_THRESHOLD"),
            )?,
        };

        let guidelines = match (get("COMMUNICATION_GUIDELINES"), get("AID_ASSIST_GUIDELINES_PATH")) {
            (Some(inline), _) => Guidelines::new(inline),
            (None, Some(path)) => Guidelines::new(std::fs::read_to_string(&path)?),
            (None, None) => {
                tracing::warn!(
                    "No communication guidelines configured; reviewed answers will carry a \
                     verify-with-office caveat"
                );
                Guidelines::absent()
            }
        };

        let defaults = RouterConfig::default();
        let router = RouterConfig {
            thresholds,
            emergency_contact: get("AID_ASSIST_EMERGENCY_CONTACT")
                .unwrap_or(defaults.emergency_contact),
            authority: get("AID_ASSIST_AUTHORITY").unwrap_or(defaults.authority),
            guidelines,
        };

        let server = ServerConfig {
            port: parse_or("AID_ASSIST_PORT", get("AID_ASSIST_PORT"), 8000)?,
            headless: parse_bool("AID_ASSIST_HEADLESS", get("AID_ASSIST_HEADLESS"), false)?,
        };

        let idle_minutes: u64 = parse_or(
            "AID_ASSIST_SESSION_IDLE_MINUTES",
            get("AID_ASSIST_SESSION_IDLE_MINUTES"),
            60,
        )?;
        let idle_secs = idle_minutes
            .checked_mul(60)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "AID_ASSIST_SESSION_IDLE_MINUTES".into(),
                message: format!("{idle_minutes} minutes is too large"),
            })?;
        let sessions = SessionConfig {
            idle_timeout: Duration::from_secs(idle_secs),
            ..SessionConfig::default()
        };

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: secrecy::SecretString::from(api_key),
                model,
            },
            router,
            server,
            sessions,
            corpus_path: get("AID_ASSIST_CORPUS_PATH").map(PathBuf::from),
            web_fallback: parse_bool("AID_ASSIST_WEB_FALLBACK", get("AID_ASSIST_WEB_FALLBACK"), true)?,
        })
    }
}

fn parse_threshold(key: &str, raw: Option<String>) -> Result<f32, ConfigError> {
    let value: f32 = parse_or(key, raw, DEFAULT_THRESHOLD)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{value} is outside [0, 1]"),
        });
    }
    Ok(value)
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}

fn parse_bool(key: &str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{other}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "ANTHROPIC_API_KEY"));
    }

    #[test]
    fn defaults_apply() {
        let config = AppConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "sk-ant-test")])).unwrap();
        assert_eq!(config.llm.backend, LlmBackend::Anthropic);
        assert_eq!(config.llm.api_key.expose_secret(), "sk-ant-test");
        assert_eq!(config.router.thresholds, Thresholds::default());
        assert_eq!(config.server.port, 8000);
        assert!(config.web_fallback);
        assert!(!config.router.guidelines.is_present());
        assert!(config.corpus_path.is_none());
    }

    #[test]
    fn openai_backend_uses_its_own_key() {
        let err = AppConfig::from_lookup(lookup(&[
            ("AID_ASSIST_LLM_BACKEND", "openai"),
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));
    }

    #[test]
    fn thresholds_are_configurable_and_bounded() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("AID_ASSIST_COMPLETENESS_THRESHOLD", "0.5"),
            ("AID_ASSIST_CONFIDENCE_THRESHOLD", "0.85"),
        ]))
        .unwrap();
        assert_eq!(config.router.thresholds.completeness, 0.5);
        assert_eq!(config.router.thresholds.confidence, 0.85);

        let err = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("AID_ASSIST_CONFIDENCE_THRESHOLD", "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn session_idle_minutes_overflow_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("AID_ASSIST_SESSION_IDLE_MINUTES", "18446744073709551615"),
        ]))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AID_ASSIST_SESSION_IDLE_MINUTES")
        );

        let config = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("AID_ASSIST_SESSION_IDLE_MINUTES", "15"),
        ]))
        .unwrap();
        assert_eq!(config.sessions.idle_timeout, Duration::from_secs(900));
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("AID_ASSIST_WEB_FALLBACK", "maybe"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("AID_ASSIST_WEB_FALLBACK"));
    }

    #[test]
    fn guidelines_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guidelines.md");
        std::fs::write(&path, "Avoid: illegal immigrant. Preferred: undocumented person.").unwrap();

        let config = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("AID_ASSIST_GUIDELINES_PATH", path.to_str().unwrap()),
        ]))
        .unwrap();
        assert!(config.router.guidelines.text().unwrap().contains("undocumented"));
    }

    #[test]
    fn inline_guidelines_win_over_path() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("COMMUNICATION_GUIDELINES", "Use person-first language."),
            ("AID_ASSIST_GUIDELINES_PATH", "/does/not/exist"),
        ]))
        .unwrap();
        assert_eq!(
            config.router.guidelines.text(),
            Some("Use person-first language.")
        );
    }

    #[test]
    fn blank_guidelines_are_absent() {
        assert!(!Guidelines::new("   \n").is_present());
        assert!(Guidelines::new("Be kind").is_present());
    }
}
