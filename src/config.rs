//! Application-level configuration loading: prompt alphabets and room policies.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::{room::Language, state_machine::RoomPolicy};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WORD_ROOMS_BACK_CONFIG_PATH";
/// Upper bound on how long a single dispatch may wait on the store.
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    alphabets: HashMap<Language, Vec<String>>,
    max_players: Option<usize>,
    dispatch_timeout: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        languages = app_config.alphabets.len(),
                        max_players = ?app_config.max_players,
                        "loaded room configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Prompts available for `language`, in configured order.
    pub fn alphabet(&self, language: Language) -> &[String] {
        self.alphabets
            .get(&language)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Return the prompts of `language` that are not already listed in `used`.
    ///
    /// Once every prompt has been drawn the whole alphabet is offered again so callers
    /// always have a candidate.
    pub fn unused_prompts(&self, language: Language, used: &[&str]) -> Vec<&str> {
        let alphabet = self.alphabet(language);
        let fresh: Vec<&str> = alphabet
            .iter()
            .map(String::as_str)
            .filter(|candidate| !used.contains(candidate))
            .collect();
        if fresh.is_empty() {
            alphabet.iter().map(String::as_str).collect()
        } else {
            fresh
        }
    }

    /// Admission policy applied by the state machine.
    pub fn room_policy(&self) -> RoomPolicy {
        RoomPolicy {
            max_players: self.max_players,
        }
    }

    /// How long a dispatch may wait before it is reported as timed out.
    pub fn dispatch_timeout(&self) -> Duration {
        self.dispatch_timeout
    }

    /// Override the capacity cap.
    pub fn with_max_players(mut self, max_players: Option<usize>) -> Self {
        self.max_players = max_players;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            alphabets: default_alphabets(),
            max_players: None,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    alphabets: HashMap<Language, String>,
    max_players: Option<usize>,
    dispatch_timeout_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let mut alphabets = default_alphabets();
        for (language, letters) in value.alphabets {
            let letters = split_letters(&letters);
            if letters.is_empty() {
                warn!(
                    language = language.code(),
                    "configured alphabet is empty; keeping the default"
                );
                continue;
            }
            alphabets.insert(language, letters);
        }

        Self {
            alphabets,
            max_players: value.max_players.filter(|max| *max > 0),
            dispatch_timeout: value
                .dispatch_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DISPATCH_TIMEOUT),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn split_letters(letters: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for letter in letters.chars().filter(|c| c.is_alphabetic()) {
        let letter = letter.to_uppercase().to_string();
        if !seen.contains(&letter) {
            seen.push(letter);
        }
    }
    seen
}

/// Built-in alphabets shipped with the binary; rare initials are left out.
fn default_alphabets() -> HashMap<Language, Vec<String>> {
    [
        (Language::En, "ABCDEFGHIJKLMNOPRSTW"),
        (Language::Es, "ABCDEFGHIJLMNOPRSTV"),
        (Language::Fr, "ABCDEFGHIJLMNOPRSTV"),
        (Language::De, "ABDEFGHIKLMNPRSTWZ"),
    ]
    .into_iter()
    .map(|(language, letters)| (language, split_letters(letters)))
    .collect()
}
