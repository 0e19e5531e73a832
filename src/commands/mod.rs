use clap::Args;
use std::path::PathBuf;

use relsync::config::{self, SyncConfig};
use relsync::Error;

pub type CmdResult<T> = relsync::Result<(T, i32)>;

/// Options shared by every command.
#[derive(Args, Default, Debug)]
pub struct GlobalArgs {
    /// Config file (default: relsync.json in the working root, if present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Repository root to operate in (default: current directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn root(&self) -> relsync::Result<PathBuf> {
        match &self.root {
            Some(root) if !root.is_dir() => Err(Error::validation_invalid_argument(
                "root",
                format!("Not a directory: {}", root.display()),
            )),
            Some(root) => Ok(root.clone()),
            None => std::env::current_dir()
                .map_err(|e| Error::internal_io(e.to_string(), Some("resolve current dir".to_string()))),
        }
    }

    /// Working root and the loaded config.
    pub fn load(&self) -> relsync::Result<(PathBuf, SyncConfig)> {
        let root = self.root()?;
        let config = config::load(&root, self.config.as_deref())?;
        Ok((root, config))
    }
}

pub mod sync;
pub mod verify;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: Option<crate::Commands>,
    sync_args: sync::SyncArgs,
    global: &GlobalArgs,
) -> (relsync::Result<serde_json::Value>, i32) {
    crate::tty::status("relsync is working...");

    match command {
        Some(crate::Commands::VerifyCreds(args)) => dispatch!(args, global, verify),
        None => dispatch!(sync_args, global, sync),
    }
}
