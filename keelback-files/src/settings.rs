//! Engine-facing configuration knobs, validated before any store I/O.

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Name of the configuration file; skipped by the walk wherever it is.
pub const CONFIG_FILE: &str = ".keelback.conf";

#[derive(Clone, Debug)]
pub struct Settings {
    /// Whitelist patterns; matching directories keep all their children.
    pub include: Vec<String>,
    /// Blacklist patterns, applied after includes.
    pub exclude: Vec<String>,
    /// Incremental backups between full backups. 0 means every backup is
    /// full.
    pub incrementals_per_full: u32,
    /// Full backups to keep. 0 disables pruning of fulls.
    pub full_keep: u32,
    /// Most recent full backups for which incrementals are also kept.
    pub incremental_for_full_keep: u32,
    pub passphrase: SecretString,
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("passphrase cannot be empty")]
    EmptyPassphrase,
    #[error("incremental_for_full_keep ({incremental}) larger than full_keep ({full}) does not make sense")]
    KeepWindow { incremental: u32, full: u32 },
    #[error("bad pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.passphrase.expose_secret().is_empty() {
            return Err(SettingsError::EmptyPassphrase);
        }
        if self.full_keep > 0 && self.incremental_for_full_keep > self.full_keep {
            return Err(SettingsError::KeepWindow {
                incremental: self.incremental_for_full_keep,
                full: self.full_keep,
            });
        }
        self.include_patterns()?;
        self.exclude_patterns()?;
        Ok(())
    }

    pub fn include_patterns(&self) -> Result<Vec<Regex>, SettingsError> {
        compile(&self.include)
    }

    pub fn exclude_patterns(&self) -> Result<Vec<Regex>, SettingsError> {
        compile(&self.exclude)
    }
}

pub(crate) fn match_any(patterns: &[Regex], s: &str) -> bool {
    patterns.iter().any(|re| re.is_match(s))
}

pub(crate) fn compile(patterns: &[String]) -> Result<Vec<Regex>, SettingsError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| SettingsError::Pattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn settings() -> Settings {
        Settings {
            include: vec![],
            exclude: vec![],
            incrementals_per_full: 3,
            full_keep: 4,
            incremental_for_full_keep: 2,
            passphrase: Secret::new("a passphrase".to_string()),
        }
    }

    #[test]
    fn valid_settings_pass() {
        settings().validate().unwrap();
    }

    #[test]
    fn empty_passphrase_is_rejected() {
        let mut settings = settings();
        settings.passphrase = Secret::new(String::new());
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::EmptyPassphrase)
        ));
    }

    #[test]
    fn keep_window_must_be_nested() {
        let mut settings = settings();
        settings.full_keep = 1;
        settings.incremental_for_full_keep = 2;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::KeepWindow { .. })
        ));

        // unlimited fulls make any incremental window fine
        settings.full_keep = 0;
        settings.validate().unwrap();
    }

    #[test]
    fn broken_patterns_are_rejected() {
        let mut settings = settings();
        settings.exclude = vec!["[".into()];
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Pattern { .. })
        ));
    }
}
