//! Host readiness checks used by the validation stage.

use std::env;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::config::ProbeConfig;

/// Questions the validation stage asks about the host.
pub trait EnvironmentProbe: Send + Sync {
    fn network_reachable(&self) -> bool;
    fn tool_available(&self, name: &str) -> bool;
}

/// Probe backed by a real TCP connect and a `PATH` scan.
pub struct SystemProbe {
    config: ProbeConfig,
}

impl SystemProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }
}

impl EnvironmentProbe for SystemProbe {
    fn network_reachable(&self) -> bool {
        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let Ok(addrs) = (self.config.host.as_str(), self.config.port).to_socket_addrs() else {
            return false;
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
    }

    fn tool_available(&self, name: &str) -> bool {
        find_on_path(name, env::var_os("PATH").as_deref()).is_some()
    }
}

fn executable_names(name: &str) -> Vec<String> {
    if cfg!(windows) {
        let exts = env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
        let mut names = vec![name.to_string()];
        names.extend(
            exts.split(';')
                .filter(|ext| !ext.is_empty())
                .map(|ext| format!("{}{}", name, ext.to_lowercase())),
        );
        names
    } else {
        vec![name.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

pub fn find_on_path(name: &str, path_var: Option<&std::ffi::OsStr>) -> Option<std::path::PathBuf> {
    let path_var = path_var?;
    let names = executable_names(name);
    env::split_paths(path_var).find_map(|dir| {
        names
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|candidate| is_executable(candidate))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn finds_executable_in_path_dirs() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let tool = dir.path().join("mytool");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let plain = dir.path().join("notexec");
        fs::write(&plain, "data").unwrap();

        let path_var = env::join_paths([dir.path()]).unwrap();
        assert_eq!(find_on_path("mytool", Some(&path_var)), Some(tool));
        assert_eq!(find_on_path("notexec", Some(&path_var)), None);
        assert_eq!(find_on_path("absent", Some(&path_var)), None);
    }

    #[test]
    fn missing_path_variable_finds_nothing() {
        assert_eq!(find_on_path("sh", None), None);
    }

    #[test]
    fn unresolvable_probe_host_is_unreachable() {
        let probe = SystemProbe::new(ProbeConfig {
            host: "host.invalid".to_string(),
            port: 53,
            timeout_secs: 1,
        });
        assert!(!probe.network_reachable());
    }
}
