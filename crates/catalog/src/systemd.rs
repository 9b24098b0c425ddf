//! Systemd service provider - shells out to systemctl

use crate::provider::{LiveState, Provider};
use crate::report::AttrDiff;
use crate::resource::{Desired, ServiceEnsure};
use anyhow::{Context, Result, bail};
use std::process::Command;

/// Manages `service` resources through `systemctl`
///
/// `is-active`/`is-enabled` exit non-zero for inactive/disabled units, so
/// only spawn failures are treated as query errors; the printed state word
/// is authoritative either way.
#[derive(Debug, Clone, Default)]
pub struct SystemdProvider {
    _private: (),
}

impl SystemdProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn query(&self, subcommand: &str, unit: &str) -> Result<String> {
        let output = Command::new("systemctl")
            .args([subcommand, unit])
            .output()
            .with_context(|| format!("failed to run systemctl {subcommand} {unit}"))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn control(&self, subcommand: &str, unit: &str) -> Result<()> {
        log::debug!("systemctl {subcommand} {unit}");
        let output = Command::new("systemctl")
            .args([subcommand, unit])
            .output()
            .with_context(|| format!("failed to run systemctl {subcommand} {unit}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("systemctl {subcommand} {unit}: {}", stderr.trim());
        }
        Ok(())
    }
}

impl Provider for SystemdProvider {
    fn rtype(&self) -> &'static str {
        "service"
    }

    fn read(&self, title: &str) -> Result<LiveState> {
        let active = self.query("is-active", title)?;
        let enabled = self.query("is-enabled", title)?;

        let ensure = if active == "active" { "running" } else { "stopped" };
        Ok(LiveState::new()
            .with("ensure", ensure)
            .with("enable", enabled == "enabled"))
    }

    fn change(&self, title: &str, desired: &Desired, diff: &AttrDiff) -> Result<()> {
        let Desired::Service { ensure, enable } = desired;

        for change in diff.changes() {
            match change.attribute.as_str() {
                "ensure" => match ensure {
                    ServiceEnsure::Running => self.control("start", title)?,
                    ServiceEnsure::Stopped => self.control("stop", title)?,
                },
                "enable" => match enable {
                    Some(true) => self.control("enable", title)?,
                    Some(false) => self.control("disable", title)?,
                    None => {}
                },
                other => bail!("service provider cannot change attribute `{other}`"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::AttrChange;
    use crate::resource::Scalar;

    #[test]
    fn test_rejects_unknown_diff_attribute() {
        let provider = SystemdProvider::new();
        let desired = Desired::Service {
            ensure: ServiceEnsure::Running,
            enable: None,
        };
        let mut diff = AttrDiff::new();
        diff.push(AttrChange {
            attribute: "flavor".into(),
            before: None,
            after: Scalar::Str("vanilla".into()),
        });

        let err = provider.change("backend-server", &desired, &diff).unwrap_err();
        assert!(err.to_string().contains("flavor"));
    }
}
