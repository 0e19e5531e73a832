use clap::Args;

use relsync::command::CommandRunner;
use relsync::health::SystemProbe;
use relsync::sync::{SyncContext, SyncOptions, SyncOrchestrator, SyncReport};

use crate::commands::{CmdResult, GlobalArgs};

#[derive(Args, Default, Debug)]
pub struct SyncArgs {
    /// Run the health check only
    #[arg(long)]
    pub check_only: bool,

    /// Skip type generation
    #[arg(long)]
    pub skip_types: bool,

    /// Skip commit and push
    #[arg(long)]
    pub skip_git: bool,

    /// Deadline for network-bound commands, in seconds
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_network: Option<u64>,

    /// Deadline for git push, in seconds
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_push: Option<u64>,

    /// Take the run lock even if another run holds it
    #[arg(long)]
    pub force: bool,
}

impl SyncArgs {
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            check_only: self.check_only,
            skip_types: self.skip_types,
            skip_git: self.skip_git,
            force: self.force,
            timeout_network: self.timeout_network,
            timeout_push: self.timeout_push,
        }
    }
}

pub fn run(args: SyncArgs, global: &GlobalArgs) -> CmdResult<SyncReport> {
    let (root, config) = global.load()?;

    relsync::log_section!("RELEASE SYNC ({})", root.display());

    let runner = CommandRunner::new(config.runner.clone());
    let probe = SystemProbe::new(config.probe.clone());
    let orchestrator = SyncOrchestrator::new(SyncContext::new(root, config), &runner, &probe)?;

    let report = orchestrator.run(&args.options());
    let exit_code = report.exit_code;
    Ok((report, exit_code))
}
