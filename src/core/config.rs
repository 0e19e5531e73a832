//! Run configuration.
//!
//! Every field has a default, so `relsync.json` is optional and may override
//! any subset. The loaded struct is passed explicitly to each component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::command::RunnerConfig;
use crate::error::{Error, Result};
use crate::io;

/// Config file looked up in the working root when `--config` is not given.
pub const CONFIG_FILE: &str = "relsync.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Schema service project passed to the type generator.
    #[serde(default = "default_project_ref")]
    pub project_ref: String,

    #[serde(default = "default_schema")]
    pub schema: String,

    #[serde(default = "default_types_output_path")]
    pub types_output_path: String,

    #[serde(default = "default_lock_path")]
    pub lock_path: String,

    /// Plaintext fallback for tokens missing from the environment.
    #[serde(default = "default_credential_file")]
    pub credential_file: String,

    #[serde(default = "default_env_file")]
    pub env_file: String,

    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            project_ref: default_project_ref(),
            schema: default_schema(),
            types_output_path: default_types_output_path(),
            lock_path: default_lock_path(),
            credential_file: default_credential_file(),
            env_file: default_env_file(),
            required_tools: default_required_tools(),
            timeouts: TimeoutConfig::default(),
            probe: ProbeConfig::default(),
            generator: GeneratorConfig::default(),
            credentials: CredentialsConfig::default(),
            git: GitConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

/// Per-command deadlines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    #[serde(default = "default_network_timeout")]
    pub network: u64,
    #[serde(default = "default_push_timeout")]
    pub push: u64,
    #[serde(default = "default_remote_check_timeout")]
    pub remote_check: u64,
    #[serde(default = "default_status_timeout")]
    pub status: u64,
    #[serde(default = "default_add_timeout")]
    pub add: u64,
    #[serde(default = "default_commit_timeout")]
    pub commit: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            network: default_network_timeout(),
            push: default_push_timeout(),
            remote_check: default_remote_check_timeout(),
            status: default_status_timeout(),
            add: default_add_timeout(),
            commit: default_commit_timeout(),
        }
    }
}

/// Endpoint used to decide whether the host has network access at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    #[serde(default = "default_probe_host")]
    pub host: String,
    #[serde(default = "default_probe_port")]
    pub port: u16,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: default_probe_host(),
            port: default_probe_port(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

/// Type generator command lines. `{{projectRef}}` and `{{schema}}` are
/// substituted before running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_command")]
    pub command: String,
    #[serde(default = "default_generator_fallback")]
    pub fallback_command: String,
    #[serde(default = "default_login_hint")]
    pub login_hint: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: default_generator_command(),
            fallback_command: default_generator_fallback(),
            login_hint: default_login_hint(),
        }
    }
}

/// How to find one token: an environment variable first, then the first line
/// of the credential file matching `line_pattern` whose captured value starts
/// with `prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRule {
    pub env: String,
    pub line_pattern: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    #[serde(default = "default_service_token_rule")]
    pub service_token: TokenRule,
    #[serde(default = "default_repo_token_rule")]
    pub repo_token: TokenRule,
    #[serde(default = "default_service_url_pattern")]
    pub service_url_pattern: String,
    #[serde(default = "default_anon_key_pattern")]
    pub anon_key_pattern: String,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            service_token: default_service_token_rule(),
            repo_token: default_repo_token_rule(),
            service_url_pattern: default_service_url_pattern(),
            anon_key_pattern: default_anon_key_pattern(),
            identity_url: default_identity_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    /// Host whose `extraheader` is overridden for the token push.
    #[serde(default = "default_push_host")]
    pub push_host: String,
    #[serde(default = "default_commit_prefix")]
    pub commit_prefix: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            push_host: default_push_host(),
            commit_prefix: default_commit_prefix(),
        }
    }
}

fn default_project_ref() -> String {
    "wwltjlnlutnuypmkwbuy".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_types_output_path() -> String {
    "src/integrations/supabase/types.ts".to_string()
}

fn default_lock_path() -> String {
    "scripts/.sync_full.lock".to_string()
}

fn default_credential_file() -> String {
    "cre.txt".to_string()
}

fn default_env_file() -> String {
    ".env".to_string()
}

fn default_required_tools() -> Vec<String> {
    vec!["git".to_string(), "npm".to_string(), "npx".to_string()]
}

fn default_network_timeout() -> u64 {
    75
}

fn default_push_timeout() -> u64 {
    180
}

fn default_remote_check_timeout() -> u64 {
    10
}

fn default_status_timeout() -> u64 {
    15
}

fn default_add_timeout() -> u64 {
    60
}

fn default_commit_timeout() -> u64 {
    30
}

fn default_probe_host() -> String {
    "8.8.8.8".to_string()
}

fn default_probe_port() -> u16 {
    53
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_generator_command() -> String {
    "npx --yes supabase gen types typescript --project-id {{projectRef}} --schema {{schema}}"
        .to_string()
}

fn default_generator_fallback() -> String {
    "npx supabase gen types typescript --project-id {{projectRef}} --schema {{schema}}".to_string()
}

fn default_login_hint() -> String {
    "If this is an authentication problem, run: npx supabase login".to_string()
}

fn default_service_token_rule() -> TokenRule {
    TokenRule {
        env: "SUPABASE_ACCESS_TOKEN".to_string(),
        line_pattern: r"(?i)^\s*token\s*:\s*(\S+)".to_string(),
        prefix: "sbp_".to_string(),
    }
}

fn default_repo_token_rule() -> TokenRule {
    TokenRule {
        env: "GITHUB_TOKEN".to_string(),
        line_pattern: r"(?i)token classic[^:]*:\s*(\S+)".to_string(),
        prefix: "ghp_".to_string(),
    }
}

fn default_service_url_pattern() -> String {
    r"URL:\s*(https://[\w.-]+)".to_string()
}

fn default_anon_key_pattern() -> String {
    r"(?i)anon key.*\r?\n\s*(ey\w[\w.-]+)".to_string()
}

fn default_identity_url() -> String {
    "https://api.github.com/user".to_string()
}

fn default_push_host() -> String {
    "github.com".to_string()
}

fn default_commit_prefix() -> String {
    "chore: ui+sync alignment".to_string()
}

impl SyncConfig {
    /// Resolve a configured path against the working root (`~` is expanded).
    pub fn resolve_path(root: &Path, configured: &str) -> PathBuf {
        let expanded = shellexpand::tilde(configured).to_string();
        let path = PathBuf::from(expanded);
        if path.is_absolute() {
            path
        } else {
            root.join(path)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("timeouts.network", self.timeouts.network),
            ("timeouts.push", self.timeouts.push),
            ("timeouts.remoteCheck", self.timeouts.remote_check),
            ("timeouts.status", self.timeouts.status),
            ("timeouts.add", self.timeouts.add),
            ("timeouts.commit", self.timeouts.commit),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(Error::config_invalid_value(
                    key,
                    Some(value.to_string()),
                    "Timeout must be at least 1 second",
                ));
            }
        }

        if self.generator.command.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "generator.command",
                None,
                "Generator command must not be empty",
            ));
        }

        if self.types_output_path.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "typesOutputPath",
                None,
                "Output path must not be empty",
            ));
        }

        Ok(())
    }
}

/// Load the run config.
///
/// An explicit path must exist. Without one, `relsync.json` in `root` is used
/// when present and defaults otherwise.
pub fn load(root: &Path, explicit: Option<&Path>) -> Result<SyncConfig> {
    let path = match explicit {
        Some(path) => SyncConfig::resolve_path(root, &path.to_string_lossy()),
        None => {
            let candidate = root.join(CONFIG_FILE);
            if !candidate.exists() {
                return Ok(SyncConfig::default());
            }
            candidate
        }
    };

    let content = io::read_file(&path, &format!("read {}", path.display()))?;
    let config: SyncConfig = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
    config.validate()?;
    Ok(config)
}
