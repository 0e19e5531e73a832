//! Live checks that the configured credentials actually work.
//!
//! Talks to the schema service REST root and the code host identity endpoint,
//! then confirms the env file still carries the values from the credential
//! file.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;

use super::{compile_pattern, read_credential_file, CredentialResolver, Credentials};
use crate::config::CredentialsConfig;
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = concat!("relsync/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub ok: bool,
    pub message: String,
}

impl CheckResult {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub service_rest: CheckResult,
    pub repo_identity: CheckResult,
    pub env_file: CheckResult,
}

impl VerifyReport {
    /// Env file drift is only a warning; the two network checks decide.
    pub fn passed(&self) -> bool {
        self.service_rest.ok && self.repo_identity.ok
    }
}

/// Non-token values scraped from the credential file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileFields {
    pub service_url: Option<String>,
    pub anon_key: Option<String>,
}

pub fn extract_fields(content: &str, config: &CredentialsConfig) -> Result<FileFields> {
    let url = compile_pattern("credentials.serviceUrlPattern", &config.service_url_pattern)?;
    let anon = compile_pattern("credentials.anonKeyPattern", &config.anon_key_pattern)?;

    let capture = |re: &regex::Regex| {
        re.captures(content)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    };

    Ok(FileFields {
        service_url: capture(&url),
        anon_key: capture(&anon),
    })
}

/// A REST root answering 2xx or 404 is reachable.
pub fn interpret_rest_status(status: u16) -> CheckResult {
    if (200..300).contains(&status) || status == 404 {
        CheckResult::pass("Connection OK")
    } else {
        CheckResult::fail(format!("Status code: {}", status))
    }
}

pub fn interpret_identity(status: u16, body: Option<&Value>) -> CheckResult {
    if status != 200 {
        return CheckResult::fail(format!("Status code: {}", status));
    }
    let login = body
        .and_then(|b| b.get("login"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    CheckResult::pass(format!("Logged in as: {}", login))
}

pub fn check_env_alignment(env_content: Option<&str>, fields: &FileFields) -> CheckResult {
    let Some(env_content) = env_content else {
        return CheckResult::fail("Env file missing");
    };

    let mut issues = Vec::new();
    if let Some(url) = &fields.service_url {
        if !env_content.contains(url.as_str()) {
            issues.push("service URL differs");
        }
    }
    if let Some(key) = &fields.anon_key {
        if !env_content.contains(key.as_str()) {
            issues.push("anon key differs");
        }
    }

    if issues.is_empty() {
        CheckResult::pass("Aligned with credential file")
    } else {
        CheckResult::fail(issues.join(", "))
    }
}

pub struct CredentialVerifier {
    client: Client,
    config: CredentialsConfig,
    credential_file: PathBuf,
    env_file: PathBuf,
}

impl CredentialVerifier {
    pub fn new(
        config: &CredentialsConfig,
        credential_file: impl Into<PathBuf>,
        env_file: impl Into<PathBuf>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))?;

        Ok(Self {
            client,
            config: config.clone(),
            credential_file: credential_file.into(),
            env_file: env_file.into(),
        })
    }

    pub fn verify(&self) -> Result<VerifyReport> {
        crate::log_section!("CREDENTIALS");

        let content = read_credential_file(&self.credential_file).ok_or_else(|| {
            Error::credentials_check_failed(
                format!(
                    "Credential file not readable: {}",
                    self.credential_file.display()
                ),
                serde_json::json!({ "path": self.credential_file.display().to_string() }),
            )
        })?;

        let fields = extract_fields(&content, &self.config)?;
        let credentials: Credentials =
            CredentialResolver::new(&self.config, &self.credential_file)?.resolve();

        let service_rest = self.check_service_rest(&fields);
        report_check("Service REST", &service_rest, false);

        let repo_identity = self.check_repo_identity(credentials.repo_token.as_deref());
        report_check("Repository token", &repo_identity, false);

        let env_content = fs::read_to_string(&self.env_file).ok();
        let env_file = check_env_alignment(env_content.as_deref(), &fields);
        report_check("Env file", &env_file, true);

        Ok(VerifyReport {
            service_rest,
            repo_identity,
            env_file,
        })
    }

    fn check_service_rest(&self, fields: &FileFields) -> CheckResult {
        let (Some(url), Some(key)) = (&fields.service_url, &fields.anon_key) else {
            return CheckResult::fail("Credentials missing");
        };

        let endpoint = format!("{}/rest/v1/", url.trim_end_matches('/'));
        match self
            .client
            .get(&endpoint)
            .header("apikey", key)
            .bearer_auth(key)
            .send()
        {
            Ok(response) => interpret_rest_status(response.status().as_u16()),
            Err(e) => CheckResult::fail(e.to_string()),
        }
    }

    fn check_repo_identity(&self, token: Option<&str>) -> CheckResult {
        let Some(token) = token else {
            return CheckResult::fail("Token missing");
        };

        let response = self
            .client
            .get(&self.config.identity_url)
            .header("Authorization", format!("token {}", token))
            .header("Accept", "application/vnd.github.v3+json")
            .send();

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.json::<Value>().ok();
                interpret_identity(status, body.as_ref())
            }
            Err(e) => CheckResult::fail(e.to_string()),
        }
    }
}

fn report_check(name: &str, result: &CheckResult, warn_only: bool) {
    if result.ok {
        crate::log_success!("{}: {}", name, result.message);
    } else if warn_only {
        crate::log_warn!("{}: {}", name, result.message);
    } else {
        crate::log_error!("{}: {}", name, result.message);
    }
}
