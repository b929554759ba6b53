use std::process::Command;

use tracing::debug;

/// Reports whether a host service is currently running.
///
/// Implementations must fold every lookup failure into `false`.
pub trait ServiceProbe: std::fmt::Debug {
    fn is_running(&self, service_name: &str) -> bool;
}

/// Asks the host service manager: `sc query` on Windows, `systemctl` elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemServiceProbe;

impl ServiceProbe for SystemServiceProbe {
    fn is_running(&self, service_name: &str) -> bool {
        let name = service_name.trim();
        if name.is_empty() {
            return false;
        }
        query_service_manager(name)
    }
}

#[cfg(windows)]
fn query_service_manager(name: &str) -> bool {
    match Command::new("sc").args(["query", name]).output() {
        Ok(output) if output.status.success() => {
            sc_output_reports_running(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            debug!(service = name, status = %output.status, "sc query reported failure");
            false
        }
        Err(err) => {
            debug!(service = name, error = %err, "unable to run sc query");
            false
        }
    }
}

#[cfg(not(windows))]
fn query_service_manager(name: &str) -> bool {
    match Command::new("systemctl")
        .args(["is-active", "--quiet", name])
        .status()
    {
        Ok(status) => status.success(),
        Err(err) => {
            debug!(service = name, error = %err, "unable to run systemctl");
            false
        }
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
fn sc_output_reports_running(stdout: &str) -> bool {
    stdout
        .lines()
        .filter(|line| line.trim_start().starts_with("STATE"))
        .any(|line| line.split_whitespace().any(|word| word == "RUNNING"))
}
