//! Secrets needed by a sync run.
//!
//! Each token is taken from its environment variable when set, otherwise from
//! the plaintext credential file. Resolution never fails: an absent or
//! unreadable file simply contributes nothing.

pub mod verify;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::config::{CredentialsConfig, TokenRule};
use crate::error::{Error, Result};
use crate::log::mask_secret;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialKind {
    ServiceToken,
    RepoToken,
}

impl CredentialKind {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialKind::ServiceToken => "Service token",
            CredentialKind::RepoToken => "Repository token",
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub service_token: Option<String>,
    pub repo_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("service_token", &self.service_token.as_deref().map(mask_secret))
            .field("repo_token", &self.repo_token.as_deref().map(mask_secret))
            .finish()
    }
}

impl Credentials {
    pub fn get(&self, kind: CredentialKind) -> Option<&str> {
        match kind {
            CredentialKind::ServiceToken => self.service_token.as_deref(),
            CredentialKind::RepoToken => self.repo_token.as_deref(),
        }
    }

    pub fn missing(&self) -> Vec<CredentialKind> {
        [CredentialKind::ServiceToken, CredentialKind::RepoToken]
            .into_iter()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }

    pub fn has_any(&self) -> bool {
        self.service_token.is_some() || self.repo_token.is_some()
    }
}

/// A token rule with its line pattern compiled.
#[derive(Debug, Clone)]
pub(crate) struct LineRule {
    env: String,
    pattern: Regex,
    prefix: String,
}

impl LineRule {
    fn compile(key: &str, rule: &TokenRule) -> Result<Self> {
        Ok(Self {
            env: rule.env.clone(),
            pattern: compile_pattern(key, &rule.line_pattern)?,
            prefix: rule.prefix.clone(),
        })
    }

    fn lookup_env(&self, lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
        lookup(&self.env)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// First line whose captured value has the expected prefix.
    fn find_in(&self, content: &str) -> Option<String> {
        content.lines().find_map(|line| {
            let value = self.pattern.captures(line)?.get(1)?.as_str().trim();
            value.starts_with(&self.prefix).then(|| value.to_string())
        })
    }
}

pub(crate) fn compile_pattern(key: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        Error::config_invalid_value(key, Some(pattern.to_string()), e.to_string())
    })
}

/// Read the credential file, tolerating absence and invalid UTF-8.
pub(crate) fn read_credential_file(path: &Path) -> Option<String> {
    fs::read(path)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

pub struct CredentialResolver {
    file: PathBuf,
    service: LineRule,
    repo: LineRule,
}

impl CredentialResolver {
    pub fn new(config: &CredentialsConfig, file: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            file: file.into(),
            service: LineRule::compile("credentials.serviceToken.linePattern", &config.service_token)?,
            repo: LineRule::compile("credentials.repoToken.linePattern", &config.repo_token)?,
        })
    }

    /// Environment variable name the service token is exported under.
    pub fn service_env(&self) -> &str {
        &self.service.env
    }

    pub fn resolve(&self) -> Credentials {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Credentials {
        let mut credentials = Credentials {
            service_token: self.service.lookup_env(&lookup),
            repo_token: self.repo.lookup_env(&lookup),
        };

        if credentials.service_token.is_some() && credentials.repo_token.is_some() {
            return credentials;
        }

        let Some(content) = read_credential_file(&self.file) else {
            return credentials;
        };

        if credentials.service_token.is_none() {
            credentials.service_token = self.service.find_in(&content);
        }
        if credentials.repo_token.is_none() {
            credentials.repo_token = self.repo.find_in(&content);
        }
        credentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const CRED_FILE: &str = "\
[SUPABASE]
Project ID: abcdef
Token: sbp_fromfile123
[GITHUB]
Token classic (repo): ghp_fromfile456
";

    fn resolver(dir: &TempDir, content: Option<&str>) -> CredentialResolver {
        let path = dir.path().join("cre.txt");
        if let Some(content) = content {
            fs::write(&path, content).unwrap();
        }
        CredentialResolver::new(&CredentialsConfig::default(), path).unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn environment_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir, Some(CRED_FILE));
        let creds = resolver.resolve_with(env(&[
            ("SUPABASE_ACCESS_TOKEN", " sbp_fromenv "),
            ("GITHUB_TOKEN", "ghp_fromenv"),
        ]));
        assert_eq!(creds.service_token.as_deref(), Some("sbp_fromenv"));
        assert_eq!(creds.repo_token.as_deref(), Some("ghp_fromenv"));
    }

    #[test]
    fn file_fills_only_missing_fields() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir, Some(CRED_FILE));
        let creds = resolver.resolve_with(env(&[("GITHUB_TOKEN", "ghp_fromenv")]));
        assert_eq!(creds.service_token.as_deref(), Some("sbp_fromfile123"));
        assert_eq!(creds.repo_token.as_deref(), Some("ghp_fromenv"));
    }

    #[test]
    fn blank_environment_value_falls_back_to_file() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir, Some(CRED_FILE));
        let creds = resolver.resolve_with(env(&[("GITHUB_TOKEN", "   ")]));
        assert_eq!(creds.repo_token.as_deref(), Some("ghp_fromfile456"));
    }

    #[test]
    fn values_with_wrong_prefix_are_skipped() {
        let dir = TempDir::new().unwrap();
        let content = "token: not-a-token\ntoken: sbp_second\n";
        let resolver = resolver(&dir, Some(content));
        let creds = resolver.resolve_with(env(&[]));
        assert_eq!(creds.service_token.as_deref(), Some("sbp_second"));
        assert_eq!(creds.repo_token, None);
    }

    #[test]
    fn missing_file_yields_environment_only() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir, None);
        let creds = resolver.resolve_with(env(&[("GITHUB_TOKEN", "ghp_x")]));
        assert_eq!(creds.service_token, None);
        assert_eq!(creds.missing(), vec![CredentialKind::ServiceToken]);
        assert!(creds.has_any());
    }

    #[test]
    fn nothing_anywhere_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let creds = resolver(&dir, None).resolve_with(env(&[]));
        assert!(!creds.has_any());
        assert_eq!(creds.missing().len(), 2);
    }

    #[test]
    fn debug_output_masks_tokens() {
        let creds = Credentials {
            service_token: Some("sbp_secretvalue".to_string()),
            repo_token: None,
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("secretvalue"));
        assert!(rendered.contains("sbp_…"));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let mut config = CredentialsConfig::default();
        config.repo_token.line_pattern = "(unclosed".to_string();
        let err = CredentialResolver::new(&config, "cre.txt").err().unwrap();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }
}
