//! Type definition artifact regeneration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::command::{excerpt, CommandExecutor, CommandResult, CommandSpec};
use crate::config::GeneratorConfig;
use crate::error::{CommandFailedDetails, Error, Result};
use crate::io;
use crate::template::{render, TemplateVars};

pub struct TypeGenerator<'a> {
    executor: &'a dyn CommandExecutor,
    config: &'a GeneratorConfig,
    project_ref: &'a str,
    schema: &'a str,
    output: PathBuf,
    root: PathBuf,
    timeout: Duration,
}

impl<'a> TypeGenerator<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        config: &'a GeneratorConfig,
        project_ref: &'a str,
        schema: &'a str,
        root: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            config,
            project_ref,
            schema,
            output: output.into(),
            root: root.into(),
            timeout,
        }
    }

    fn command(&self, template: &str) -> String {
        render(
            template,
            &[
                (TemplateVars::PROJECT_REF, self.project_ref),
                (TemplateVars::SCHEMA, self.schema),
            ],
        )
    }

    fn run(
        &self,
        template: &str,
        description: &str,
        environment: &BTreeMap<String, String>,
    ) -> Result<CommandResult> {
        let spec = CommandSpec::new(self.command(template), description, self.timeout)
            .with_env(environment)
            .in_dir(&self.root);
        self.executor.run(&spec)
    }

    /// Generate and write the artifact, trying the fallback command once.
    ///
    /// `environment` already carries the service token when one was resolved.
    /// Returns the written path.
    pub fn generate(&self, environment: &BTreeMap<String, String>) -> Result<PathBuf> {
        let primary = self.run(
            &self.config.command,
            "Generating TypeScript types",
            environment,
        );

        let result = match primary {
            Ok(result) if result.success() => result,
            _ => self.run(
                &self.config.fallback_command,
                "Generating TypeScript types (fallback)",
                environment,
            )?,
        };

        if !result.success() || result.stdout.trim().is_empty() {
            let mut err = Error::generation_failed(
                "Could not generate types",
                CommandFailedDetails {
                    description: "Generating TypeScript types".to_string(),
                    exit_code: result.exit_code,
                    stderr: excerpt(&result.stderr, 800),
                },
            );
            if !result.stderr.trim().is_empty() {
                err = err.with_hint(self.config.login_hint.clone());
            }
            return Err(err);
        }

        io::write_file_atomic(&self.output, &result.stdout, "write generated types")?;
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Scripted {
        results: Mutex<Vec<Result<CommandResult>>>,
        seen: Mutex<Vec<CommandSpec>>,
    }

    impl Scripted {
        fn new(results: Vec<CommandResult>) -> Self {
            Self::with_outcomes(results.into_iter().map(Ok).collect())
        }

        fn with_outcomes(outcomes: Vec<Result<CommandResult>>) -> Self {
            Self {
                results: Mutex::new(outcomes.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandExecutor for Scripted {
        fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
            self.seen.lock().unwrap().push(spec.clone());
            self.results.lock().unwrap().pop().unwrap_or_else(|| Ok(CommandResult::default()))
        }
    }

    fn output(stdout: &str) -> CommandResult {
        CommandResult {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    fn failure(stderr: &str) -> CommandResult {
        CommandResult {
            exit_code: 1,
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn writes_artifact_and_substitutes_placeholders() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("src/types.ts");
        let executor = Scripted::new(vec![output("export type Json = string;\n")]);
        let config = GeneratorConfig::default();
        let generator = TypeGenerator::new(
            &executor,
            &config,
            "proj123",
            "public",
            dir.path(),
            &target,
            Duration::from_secs(5),
        );

        let mut env = BTreeMap::new();
        env.insert("SUPABASE_ACCESS_TOKEN".to_string(), "sbp_x".to_string());
        let written = generator.generate(&env).unwrap();

        assert_eq!(written, target);
        assert_eq!(fs::read_to_string(&target).unwrap(), "export type Json = string;\n");

        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].command_line.contains("--project-id proj123 --schema public"));
        assert_eq!(seen[0].environment["SUPABASE_ACCESS_TOKEN"], "sbp_x");
    }

    #[test]
    fn falls_back_once_then_reports_with_login_hint() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("types.ts");
        let executor = Scripted::new(vec![failure("401 Unauthorized"), failure("401 Unauthorized")]);
        let config = GeneratorConfig::default();
        let generator = TypeGenerator::new(
            &executor,
            &config,
            "proj",
            "public",
            dir.path(),
            &target,
            Duration::from_secs(5),
        );

        let err = generator.generate(&BTreeMap::new()).unwrap_err();
        assert_eq!(err.code.as_str(), "generation.failed");
        assert_eq!(err.hints.len(), 1);
        assert_eq!(executor.seen.lock().unwrap().len(), 2);
        assert!(!target.exists());
    }

    #[test]
    fn primary_that_cannot_start_still_tries_fallback() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("types.ts");
        let executor = Scripted::with_outcomes(vec![
            Err(Error::command_spawn_failed(
                "Generating TypeScript types",
                "No such file or directory",
            )),
            Ok(output("export type Json = number;\n")),
        ]);
        let config = GeneratorConfig::default();
        let generator = TypeGenerator::new(
            &executor,
            &config,
            "proj",
            "public",
            dir.path(),
            &target,
            Duration::from_secs(5),
        );

        generator.generate(&BTreeMap::new()).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "export type Json = number;\n");

        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].description, "Generating TypeScript types (fallback)");
    }

    #[test]
    fn blank_output_leaves_existing_artifact_untouched() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("types.ts");
        fs::write(&target, "old").unwrap();
        let executor = Scripted::new(vec![output("  \n")]);
        let config = GeneratorConfig::default();
        let generator = TypeGenerator::new(
            &executor,
            &config,
            "proj",
            "public",
            dir.path(),
            &target,
            Duration::from_secs(5),
        );

        let err = generator.generate(&BTreeMap::new()).unwrap_err();
        assert!(err.hints.is_empty());
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
    }
}
