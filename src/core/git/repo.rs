use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Local};
use serde::Serialize;

use super::classify::{classify_push_failure, PushErrorKind, PushFailureClassifier};
use crate::command::{excerpt, CommandExecutor, CommandResult, CommandSpec};
use crate::config::TimeoutConfig;
use crate::error::{CommandFailedDetails, Error, Result};
use crate::shell::quote_arg;

const DETAIL_EXCERPT_CHARS: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PushOutcome {
    Pushed,
    PushedWithToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

/// `<prefix> YYYY-MM-DD HH:MM`
pub fn commit_message(prefix: &str, now: DateTime<Local>) -> String {
    format!("{} {}", prefix, now.format("%Y-%m-%d %H:%M"))
}

/// Push with a one-off `extraheader` carrying the token as basic auth.
pub fn token_push_command(host: &str, token: &str) -> String {
    let basic = STANDARD.encode(format!("x-access-token:{}", token));
    let setting = format!(
        "http.https://{}/.extraheader=AUTHORIZATION: basic {}",
        host, basic
    );
    format!("git -c {} push", quote_arg(&setting))
}

fn is_nothing_to_commit(result: &CommandResult) -> bool {
    result
        .combined_text()
        .to_lowercase()
        .contains("nothing to commit")
}

/// Git operations of the sync stage, run through a [`CommandExecutor`].
pub struct GitRepo<'a> {
    executor: &'a dyn CommandExecutor,
    root: PathBuf,
    environment: BTreeMap<String, String>,
    timeouts: TimeoutConfig,
    push_host: String,
    classifier: PushFailureClassifier,
}

impl<'a> GitRepo<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        root: impl Into<PathBuf>,
        environment: BTreeMap<String, String>,
        timeouts: TimeoutConfig,
        push_host: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            root: root.into(),
            environment,
            timeouts,
            push_host: push_host.into(),
            classifier: classify_push_failure,
        }
    }

    pub fn with_classifier(mut self, classifier: PushFailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    fn spec(&self, command_line: impl Into<String>, description: &str, secs: u64) -> CommandSpec {
        CommandSpec::new(command_line, description, Duration::from_secs(secs))
            .with_env(&self.environment)
            .in_dir(&self.root)
    }

    fn details(spec: &CommandSpec, result: &CommandResult) -> CommandFailedDetails {
        CommandFailedDetails {
            description: spec.description.clone(),
            exit_code: result.exit_code,
            stderr: excerpt(&result.error_text(), DETAIL_EXCERPT_CHARS),
        }
    }

    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandResult> {
        let result = self.executor.run(spec)?;
        if result.timed_out {
            return Err(Error::command_timeout(
                &spec.description,
                spec.timeout.as_secs(),
            ));
        }
        if !result.success() {
            return Err(Error::sync_failed(Self::details(spec, &result)));
        }
        Ok(result)
    }

    /// True when `git remote -v` succeeds and lists at least one remote.
    pub fn has_remote(&self) -> Result<bool> {
        let spec = self.spec(
            "git remote -v",
            "Checking git remote",
            self.timeouts.remote_check,
        );
        let result = self.executor.run(&spec)?;
        Ok(result.success() && !result.stdout.trim().is_empty())
    }

    /// Porcelain status lines; empty means a clean tree.
    pub fn status(&self) -> Result<String> {
        let spec = self.spec(
            "git status --porcelain",
            "Checking for changes",
            self.timeouts.status,
        );
        Ok(self.run_checked(&spec)?.stdout)
    }

    /// Local commits not yet on the upstream. A failing `git cherry` (no
    /// upstream configured) counts as none.
    pub fn has_pending_commits(&self) -> Result<bool> {
        let spec = self.spec(
            "git cherry -v",
            "Checking for unpushed commits",
            self.timeouts.status,
        );
        let result = self.executor.run(&spec)?;
        Ok(result.success() && !result.stdout.trim().is_empty())
    }

    pub fn add_all(&self) -> Result<()> {
        let spec = self.spec("git add .", "Git add", self.timeouts.add);
        self.run_checked(&spec).map(|_| ())
    }

    pub fn commit(&self, message: &str) -> Result<CommitOutcome> {
        let spec = self.spec(
            format!("git commit -m {}", quote_arg(message)),
            "Git commit",
            self.timeouts.commit,
        );
        let result = self.executor.run(&spec)?;

        if result.success() {
            return Ok(CommitOutcome::Committed);
        }
        if !result.timed_out && is_nothing_to_commit(&result) {
            crate::log_info!("No changes to commit.");
            return Ok(CommitOutcome::NothingToCommit);
        }
        if result.timed_out {
            return Err(Error::command_timeout(
                &spec.description,
                spec.timeout.as_secs(),
            ));
        }
        Err(Error::sync_failed(Self::details(&spec, &result)))
    }

    /// Plain `git push`, retried once with the token when the rejection
    /// classifies as an authentication failure.
    pub fn push(&self, description: &str, token: Option<&str>) -> Result<PushOutcome> {
        let spec = self.spec("git push", description, self.timeouts.push);
        let result = self.executor.run(&spec)?;

        if result.success() {
            return Ok(PushOutcome::Pushed);
        }
        if result.timed_out {
            return Err(Error::command_timeout(
                &spec.description,
                spec.timeout.as_secs(),
            ));
        }

        let details = Self::details(&spec, &result);
        if (self.classifier)(&result.combined_text()) != PushErrorKind::Auth {
            return Err(Error::sync_failed(details));
        }

        let Some(token) = token else {
            return Err(Error::sync_auth_failed(details)
                .with_hint("Provide a repository token to enable the authenticated push"));
        };

        crate::log_warn!("Push rejected by authentication; retrying with repository token");
        let retry = self.spec(
            token_push_command(&self.push_host, token),
            "Git push (token)",
            self.timeouts.push,
        );
        let retried = self.executor.run(&retry)?;
        if retried.success() {
            return Ok(PushOutcome::PushedWithToken);
        }
        if retried.timed_out {
            return Err(Error::command_timeout(
                &retry.description,
                retry.timeout.as_secs(),
            ));
        }
        Err(Error::sync_auth_failed(Self::details(&retry, &retried)))
    }
}
