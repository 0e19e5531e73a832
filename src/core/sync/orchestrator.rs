use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Local;

use super::types::*;
use crate::command::CommandExecutor;
use crate::config::SyncConfig;
use crate::credentials::{CredentialKind, CredentialResolver, Credentials};
use crate::error::{Error, ErrorCode, Result};
use crate::git::{commit_message, GitRepo, PushOutcome};
use crate::health::EnvironmentProbe;
use crate::lock::LockManager;
use crate::typegen::TypeGenerator;

type EnvLookup<'a> = Box<dyn Fn(&str) -> Option<String> + Send + Sync + 'a>;

/// Child environment defaults: `CI=1` and no git credential prompts, unless
/// the caller's environment already sets them.
pub fn base_environment(lookup: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for (key, value) in [("CI", "1"), ("GIT_TERMINAL_PROMPT", "0")] {
        if lookup(key).is_none() {
            env.insert(key.to_string(), value.to_string());
        }
    }
    env
}

/// Working root plus the loaded configuration.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub root: PathBuf,
    pub config: SyncConfig,
}

impl SyncContext {
    pub fn new(root: impl Into<PathBuf>, config: SyncConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    fn path(&self, configured: &str) -> PathBuf {
        SyncConfig::resolve_path(&self.root, configured)
    }
}

/// Drives validate, generate and sync under the run lock.
pub struct SyncOrchestrator<'a> {
    context: SyncContext,
    executor: &'a dyn CommandExecutor,
    probe: &'a dyn EnvironmentProbe,
    resolver: CredentialResolver,
    env_lookup: EnvLookup<'a>,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        context: SyncContext,
        executor: &'a dyn CommandExecutor,
        probe: &'a dyn EnvironmentProbe,
    ) -> Result<Self> {
        let resolver = CredentialResolver::new(
            &context.config.credentials,
            context.path(&context.config.credential_file),
        )?;
        Ok(Self {
            context,
            executor,
            probe,
            resolver,
            env_lookup: Box::new(|name: &str| std::env::var(name).ok()),
        })
    }

    /// Replace the process environment as the source of tokens and defaults.
    pub fn with_env_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'a,
    ) -> Self {
        self.env_lookup = Box::new(lookup);
        self
    }

    fn effective_config(&self, options: &SyncOptions) -> SyncConfig {
        let mut config = self.context.config.clone();
        if let Some(secs) = options.timeout_network {
            config.timeouts.network = secs;
        }
        if let Some(secs) = options.timeout_push {
            config.timeouts.push = secs;
        }
        config
    }

    pub fn run(&self, options: &SyncOptions) -> SyncReport {
        let config = self.effective_config(options);
        let lock = LockManager::new(self.context.path(&config.lock_path));

        let guard = match lock.acquire(options.force) {
            Ok(guard) => guard,
            Err(err) => {
                crate::log_error!("{}", err.message);
                if let Some(holder) = err.details.get("holder").and_then(|h| h.as_str()) {
                    crate::log_error!("Lock detail: {}", holder);
                }
                let exit_code = if err.code == ErrorCode::LockContention {
                    EXIT_LOCK_HELD
                } else {
                    EXIT_FAILURE
                };
                return SyncReport {
                    state: RunState::Aborted,
                    exit_code,
                    stages: Vec::new(),
                    skipped: Vec::new(),
                    aborted_by: Some(StageError::from(&err)),
                    elapsed_secs: 0.0,
                };
            }
        };

        let started = Instant::now();
        let mut report = self.run_stages(&config, options);
        drop(guard);

        let elapsed = started.elapsed();
        report.elapsed_secs = round_tenths(elapsed);
        crate::log_info!("Finished in {:.1}s", elapsed.as_secs_f64());
        report
    }

    fn run_stages(&self, config: &SyncConfig, options: &SyncOptions) -> SyncReport {
        let mut report = SyncReport {
            state: RunState::Init,
            exit_code: EXIT_OK,
            stages: Vec::new(),
            skipped: Vec::new(),
            aborted_by: None,
            elapsed_secs: 0.0,
        };

        let credentials = self.resolver.resolve_with(&self.env_lookup);
        let environment = base_environment(&self.env_lookup);

        report.state = Stage::Validate.state();
        let validation = self.validate(config, &credentials, &environment);
        let fatal = validation.outcome == StageOutcome::FailedFatal;
        report.stages.push(validation);
        if fatal {
            report.state = RunState::Aborted;
            report.exit_code = EXIT_FAILURE;
            return report;
        }

        if options.check_only {
            crate::log_success!("Check complete.");
            report.skipped = vec![Stage::GenerateArtifact, Stage::SyncRepo];
            report.state = RunState::Done;
            return report;
        }

        if options.skip_types {
            report.skipped.push(Stage::GenerateArtifact);
        } else {
            report.state = Stage::GenerateArtifact.state();
            let generation = self.generate(config, &credentials, &environment);
            report.stages.push(generation);
        }

        if options.skip_git {
            report.skipped.push(Stage::SyncRepo);
        } else {
            report.state = Stage::SyncRepo.state();
            let sync = self.sync(config, &credentials, &environment);
            if sync.outcome == StageOutcome::FailedFatal {
                report.exit_code = EXIT_FAILURE;
            }
            report.stages.push(sync);
        }

        report.state = RunState::Done;
        report
    }

    fn git(&self, config: &SyncConfig, environment: &BTreeMap<String, String>) -> GitRepo<'a> {
        GitRepo::new(
            self.executor,
            &self.context.root,
            environment.clone(),
            config.timeouts.clone(),
            &config.git.push_host,
        )
    }

    fn validate(
        &self,
        config: &SyncConfig,
        credentials: &Credentials,
        environment: &BTreeMap<String, String>,
    ) -> StageReport {
        crate::log_section!("1. VALIDATION (HEALTH CHECK)");
        let mut failures = Vec::new();

        if self.probe.network_reachable() {
            crate::log_success!("Network connection: OK");
        } else {
            crate::log_error!("No network connection.");
            failures.push(
                Error::environment(
                    ErrorCode::EnvironmentNetworkUnreachable,
                    format!(
                        "Network unreachable ({}:{})",
                        config.probe.host, config.probe.port
                    ),
                )
                .with_retryable(true),
            );
        }

        for tool in &config.required_tools {
            if self.probe.tool_available(tool) {
                crate::log_success!("Tool '{}': OK", tool);
            } else {
                crate::log_error!("Tool '{}': NOT FOUND", tool);
                failures.push(Error::environment(
                    ErrorCode::EnvironmentToolMissing,
                    format!("Required tool not found: {}", tool),
                ));
            }
        }

        for kind in [CredentialKind::ServiceToken, CredentialKind::RepoToken] {
            match (credentials.get(kind), kind) {
                (Some(_), _) => crate::log_success!("{}: OK", kind.label()),
                (None, CredentialKind::ServiceToken) => {
                    crate::log_warn!("{}: missing (type generation may fail).", kind.label())
                }
                (None, CredentialKind::RepoToken) => {
                    crate::log_warn!("{}: missing (push may fail).", kind.label())
                }
            }
        }
        if !credentials.has_any() {
            crate::log_warn!("No credentials resolved from environment or credential file.");
        }

        match self.git(config, environment).has_remote() {
            Ok(true) => crate::log_success!("Git remote: OK"),
            Ok(false) => {
                crate::log_error!("Git remote missing. Configure 'origin' before syncing.");
                failures.push(
                    Error::environment(
                        ErrorCode::EnvironmentRemoteMissing,
                        "No git remote configured",
                    )
                    .with_hint("Add one with: git remote add origin <url>"),
                );
            }
            Err(err) => {
                crate::log_error!("Git remote check failed: {}", err.message);
                failures.push(Error::environment(
                    ErrorCode::EnvironmentCheckFailed,
                    format!("Git remote check failed: {}", err.message),
                ));
            }
        }

        if failures.is_empty() {
            StageReport::succeeded(Stage::Validate, "Environment ready")
        } else {
            StageReport::failed(Stage::Validate, StageOutcome::FailedFatal, &failures)
        }
    }

    fn generate(
        &self,
        config: &SyncConfig,
        credentials: &Credentials,
        environment: &BTreeMap<String, String>,
    ) -> StageReport {
        crate::log_section!("2. GENERATE TYPES");

        let mut env = environment.clone();
        if let Some(token) = &credentials.service_token {
            env.insert(self.resolver.service_env().to_string(), token.clone());
        }

        let output = self.context.path(&config.types_output_path);
        let generator = TypeGenerator::new(
            self.executor,
            &config.generator,
            &config.project_ref,
            &config.schema,
            &self.context.root,
            output,
            Duration::from_secs(config.timeouts.network),
        );

        match generator.generate(&env) {
            Ok(path) => {
                let message = format!("File updated: {}", path.display());
                crate::log_success!("{}", message);
                StageReport::succeeded(Stage::GenerateArtifact, message)
            }
            Err(err) => {
                crate::log_warn!("Could not generate types automatically.");
                for hint in &err.hints {
                    crate::log_info!("{}", hint.message);
                }
                crate::log_warn!("Continuing without types (resilient mode).");
                StageReport::failed(
                    Stage::GenerateArtifact,
                    StageOutcome::FailedContinuable,
                    &[err],
                )
            }
        }
    }

    fn sync(
        &self,
        config: &SyncConfig,
        credentials: &Credentials,
        environment: &BTreeMap<String, String>,
    ) -> StageReport {
        crate::log_section!("3. GIT: COMMIT & PUSH");

        match self.sync_repo(config, credentials.repo_token.as_deref(), environment) {
            Ok(message) => StageReport::succeeded(Stage::SyncRepo, message),
            Err(err) => {
                crate::log_error!("Sync failed: {}", err.message);
                StageReport::failed(Stage::SyncRepo, StageOutcome::FailedFatal, &[err])
            }
        }
    }

    fn sync_repo(
        &self,
        config: &SyncConfig,
        token: Option<&str>,
        environment: &BTreeMap<String, String>,
    ) -> Result<String> {
        let repo = self.git(config, environment);

        let status = repo.status()?;
        if status.trim().is_empty() {
            crate::log_info!("Working tree clean. Nothing to commit.");
            if !repo.has_pending_commits()? {
                return Ok("Nothing to sync".to_string());
            }
            let outcome = repo.push("Pushing pending commits", token)?;
            return Ok(push_message("Pending commits pushed", outcome));
        }

        repo.add_all()?;
        repo.commit(&commit_message(&config.git.commit_prefix, Local::now()))?;
        let outcome = repo.push("Git push", token)?;
        Ok(push_message("Changes pushed", outcome))
    }
}

fn push_message(base: &str, outcome: PushOutcome) -> String {
    match outcome {
        PushOutcome::Pushed => base.to_string(),
        PushOutcome::PushedWithToken => format!("{} (token)", base),
    }
}

fn round_tenths(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 10.0).round() / 10.0
}
