use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use relsync::command::{CommandExecutor, CommandResult, CommandSpec};
use relsync::config::SyncConfig;
use relsync::health::EnvironmentProbe;
use relsync::sync::{
    RunState, Stage, StageOutcome, SyncContext, SyncOptions, SyncOrchestrator, SyncReport,
};
use relsync::Result;
use tempfile::TempDir;

/// Answers commands by prefix and records every command line it sees.
#[derive(Default)]
struct FakeShell {
    rules: Vec<(String, CommandResult)>,
    seen: Mutex<Vec<CommandSpec>>,
}

impl FakeShell {
    fn on(mut self, prefix: &str, result: CommandResult) -> Self {
        self.rules.push((prefix.to_string(), result));
        self
    }

    fn commands(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.command_line.clone())
            .collect()
    }

    fn count(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }
}

impl CommandExecutor for FakeShell {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        self.seen.lock().unwrap().push(spec.clone());
        Ok(self
            .rules
            .iter()
            .find(|(prefix, _)| spec.command_line.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }
}

struct FakeProbe {
    network: bool,
    missing_tool: Option<&'static str>,
}

impl FakeProbe {
    fn healthy() -> Self {
        Self {
            network: true,
            missing_tool: None,
        }
    }
}

impl EnvironmentProbe for FakeProbe {
    fn network_reachable(&self) -> bool {
        self.network
    }

    fn tool_available(&self, name: &str) -> bool {
        self.missing_tool != Some(name)
    }
}

fn ok(stdout: &str) -> CommandResult {
    CommandResult {
        stdout: stdout.to_string(),
        ..Default::default()
    }
}

fn fail(stderr: &str) -> CommandResult {
    CommandResult {
        exit_code: 128,
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

const REMOTE: &str = "origin\thttps://github.com/acme/app.git (fetch)\n";

struct Harness {
    dir: TempDir,
    env: HashMap<String, String>,
}

impl Harness {
    fn new() -> Self {
        let mut env = HashMap::new();
        env.insert("SUPABASE_ACCESS_TOKEN".to_string(), "sbp_envtoken".to_string());
        env.insert("GITHUB_TOKEN".to_string(), "ghp_envtoken".to_string());
        Self {
            dir: TempDir::new().unwrap(),
            env,
        }
    }

    fn without_repo_token(mut self) -> Self {
        self.env.remove("GITHUB_TOKEN");
        self
    }

    fn lock_path(&self) -> std::path::PathBuf {
        self.dir.path().join(SyncConfig::default().lock_path)
    }

    fn run(&self, shell: &FakeShell, probe: &FakeProbe, options: SyncOptions) -> SyncReport {
        let env = self.env.clone();
        let context = SyncContext::new(self.dir.path(), SyncConfig::default());
        SyncOrchestrator::new(context, shell, probe)
            .unwrap()
            .with_env_lookup(move |name| env.get(name).cloned())
            .run(&options)
    }
}

fn outcome(report: &SyncReport, stage: Stage) -> StageOutcome {
    report.stage(stage).unwrap().outcome
}

#[test]
fn network_down_aborts_after_validation_and_releases_lock() {
    let harness = Harness::new();
    let shell = FakeShell::default().on("git remote -v", ok(REMOTE));
    let probe = FakeProbe {
        network: false,
        missing_tool: None,
    };

    let report = harness.run(&shell, &probe, SyncOptions::default());

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(outcome(&report, Stage::Validate), StageOutcome::FailedFatal);
    assert!(!report.ran(Stage::GenerateArtifact));
    assert!(!report.ran(Stage::SyncRepo));
    assert_eq!(shell.count("npx"), 0);
    assert!(!harness.lock_path().exists());
}

#[test]
fn clean_tree_without_pending_commits_neither_commits_nor_pushes() {
    let harness = Harness::new();
    let shell = FakeShell::default()
        .on("git remote -v", ok(REMOTE))
        .on("git status --porcelain", ok(""))
        .on("git cherry -v", ok(""));

    let options = SyncOptions {
        skip_types: true,
        ..Default::default()
    };
    let report = harness.run(&shell, &FakeProbe::healthy(), options);

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(outcome(&report, Stage::SyncRepo), StageOutcome::Succeeded);
    assert_eq!(report.skipped, vec![Stage::GenerateArtifact]);
    assert_eq!(shell.count("git commit"), 0);
    assert_eq!(shell.count("push"), 0);
}

#[test]
fn clean_tree_with_pending_commits_pushes_them() {
    let harness = Harness::new();
    let shell = FakeShell::default()
        .on("git remote -v", ok(REMOTE))
        .on("git status --porcelain", ok(""))
        .on("git cherry -v", ok("+ abc123 feat: thing\n"))
        .on("git push", ok(""));

    let options = SyncOptions {
        skip_types: true,
        ..Default::default()
    };
    let report = harness.run(&shell, &FakeProbe::healthy(), options);

    assert_eq!(report.exit_code, 0);
    assert_eq!(shell.count("git push"), 1);
    assert_eq!(shell.count("git commit"), 0);
}

#[test]
fn auth_rejected_push_retries_once_with_token_then_fails_stage() {
    let harness = Harness::new();
    let shell = FakeShell::default()
        .on("git remote -v", ok(REMOTE))
        .on("git status --porcelain", ok(" M src/App.tsx\n"))
        .on("git push", fail("remote: Repository not found.\nfatal: repository not found"))
        .on("git -c", fail("remote: Invalid username or password."));

    let options = SyncOptions {
        skip_types: true,
        ..Default::default()
    };
    let report = harness.run(&shell, &FakeProbe::healthy(), options);

    assert_eq!(shell.count("git add ."), 1);
    assert_eq!(shell.count("git commit -m"), 1);
    assert_eq!(shell.count("extraheader"), 1);
    assert_eq!(outcome(&report, Stage::SyncRepo), StageOutcome::FailedFatal);
    assert_eq!(report.exit_code, 1);
    assert_eq!(report.state, RunState::Done);
    assert!(!harness.lock_path().exists());

    let stage = report.stage(Stage::SyncRepo).unwrap();
    assert_eq!(stage.errors[0].code, "sync.auth_failed");
}

#[test]
fn successful_token_retry_completes_the_run() {
    let harness = Harness::new();
    let shell = FakeShell::default()
        .on("git remote -v", ok(REMOTE))
        .on("git status --porcelain", ok("?? new.ts\n"))
        .on("git push", fail("fatal: Authentication failed for 'https://github.com/acme/app.git/'"))
        .on("git -c", ok(""));

    let options = SyncOptions {
        skip_types: true,
        ..Default::default()
    };
    let report = harness.run(&shell, &FakeProbe::healthy(), options);

    assert_eq!(report.exit_code, 0);
    let stage = report.stage(Stage::SyncRepo).unwrap();
    assert_eq!(stage.message.as_deref(), Some("Changes pushed (token)"));
}

#[test]
fn auth_rejected_push_without_token_is_not_retried() {
    let harness = Harness::new().without_repo_token();
    let shell = FakeShell::default()
        .on("git remote -v", ok(REMOTE))
        .on("git status --porcelain", ok(" M a.ts\n"))
        .on("git push", fail("error: The requested URL returned error: 403"));

    let options = SyncOptions {
        skip_types: true,
        ..Default::default()
    };
    let report = harness.run(&shell, &FakeProbe::healthy(), options);

    assert_eq!(shell.count("extraheader"), 0);
    assert_eq!(report.exit_code, 1);
}

#[test]
fn check_only_runs_validation_alone() {
    let harness = Harness::new();
    let shell = FakeShell::default().on("git remote -v", ok(REMOTE));

    let options = SyncOptions {
        check_only: true,
        ..Default::default()
    };
    let report = harness.run(&shell, &FakeProbe::healthy(), options);

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.stages.len(), 1);
    assert_eq!(
        report.skipped,
        vec![Stage::GenerateArtifact, Stage::SyncRepo]
    );
    assert_eq!(shell.commands(), vec!["git remote -v".to_string()]);
}

#[test]
fn held_lock_exits_two_before_any_stage() {
    let harness = Harness::new();
    let lock = harness.lock_path();
    fs::create_dir_all(lock.parent().unwrap()).unwrap();
    fs::write(&lock, "pid=1 started_at=2024-01-01T00:00:00+00:00").unwrap();

    let shell = FakeShell::default().on("git remote -v", ok(REMOTE));
    let report = harness.run(&shell, &FakeProbe::healthy(), SyncOptions::default());

    assert_eq!(report.exit_code, 2);
    assert_eq!(report.state, RunState::Aborted);
    assert!(report.stages.is_empty());
    assert!(shell.commands().is_empty());
    assert_eq!(report.aborted_by.unwrap().code, "lock.contention");
    assert!(lock.exists());
}

#[test]
fn forced_run_proceeds_past_a_held_lock() {
    let harness = Harness::new();
    let lock = harness.lock_path();
    fs::create_dir_all(lock.parent().unwrap()).unwrap();
    fs::write(&lock, "pid=1 started_at=2024-01-01T00:00:00+00:00").unwrap();

    let shell = FakeShell::default().on("git remote -v", ok(REMOTE));
    let options = SyncOptions {
        check_only: true,
        force: true,
        ..Default::default()
    };
    let report = harness.run(&shell, &FakeProbe::healthy(), options);

    assert_eq!(report.exit_code, 0);
    assert!(!lock.exists());
}

#[test]
fn generation_failure_is_continuable() {
    let harness = Harness::new();
    let shell = FakeShell::default()
        .on("git remote -v", ok(REMOTE))
        .on("npx", fail("Access token not provided"))
        .on("git status --porcelain", ok(""))
        .on("git cherry -v", ok(""));

    let report = harness.run(&shell, &FakeProbe::healthy(), SyncOptions::default());

    assert_eq!(
        outcome(&report, Stage::GenerateArtifact),
        StageOutcome::FailedContinuable
    );
    assert_eq!(outcome(&report, Stage::SyncRepo), StageOutcome::Succeeded);
    assert_eq!(report.exit_code, 0);
    assert_eq!(shell.count("npx"), 2);
}

#[test]
fn generation_writes_artifact_with_service_token() {
    let harness = Harness::new();
    let shell = FakeShell::default()
        .on("git remote -v", ok(REMOTE))
        .on("npx", ok("export type Database = {};\n"));

    let options = SyncOptions {
        skip_git: true,
        timeout_network: Some(12),
        ..Default::default()
    };
    let report = harness.run(&shell, &FakeProbe::healthy(), options);

    assert_eq!(report.exit_code, 0);
    let artifact = harness
        .dir
        .path()
        .join(SyncConfig::default().types_output_path);
    assert_eq!(
        fs::read_to_string(artifact).unwrap(),
        "export type Database = {};\n"
    );

    let seen = shell.seen.lock().unwrap();
    let generate = seen
        .iter()
        .find(|spec| spec.command_line.starts_with("npx"))
        .unwrap();
    assert_eq!(generate.environment["SUPABASE_ACCESS_TOKEN"], "sbp_envtoken");
    assert_eq!(generate.environment["CI"], "1");
    assert_eq!(generate.timeout.as_secs(), 12);
}

#[test]
fn missing_remote_or_tool_is_fatal() {
    let harness = Harness::new();
    let shell = FakeShell::default().on("git remote -v", ok(""));
    let probe = FakeProbe {
        network: true,
        missing_tool: Some("npx"),
    };

    let report = harness.run(&shell, &probe, SyncOptions::default());

    assert_eq!(report.exit_code, 1);
    let validation = report.stage(Stage::Validate).unwrap();
    let codes: Vec<&str> = validation.errors.iter().map(|e| e.code.as_str()).collect();
    assert_eq!(
        codes,
        vec!["environment.tool_missing", "environment.remote_missing"]
    );
}
