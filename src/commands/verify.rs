use clap::Args;

use relsync::config::SyncConfig;
use relsync::credentials::verify::{CredentialVerifier, VerifyReport};
use relsync::sync::{EXIT_FAILURE, EXIT_OK};

use crate::commands::{CmdResult, GlobalArgs};

#[derive(Args, Debug)]
pub struct VerifyArgs {}

pub fn run(_args: VerifyArgs, global: &GlobalArgs) -> CmdResult<VerifyReport> {
    let (root, config) = global.load()?;

    let verifier = CredentialVerifier::new(
        &config.credentials,
        SyncConfig::resolve_path(&root, &config.credential_file),
        SyncConfig::resolve_path(&root, &config.env_file),
    )?;
    let report = verifier.verify()?;

    let exit_code = if report.passed() { EXIT_OK } else { EXIT_FAILURE };
    Ok((report, exit_code))
}
