use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use super::{run_tool, ToolCommand, ToolFailure, TOOL_TIMEOUT};
use crate::error::{AgentError, AgentResult};

pub const APP_SETTLE: Duration = Duration::from_secs(2);
pub const URL_SETTLE: Duration = Duration::from_secs(1);

/// How the current OS opens applications and URLs. Implementations only
/// build commands; launching, fallback and settling are shared.
#[async_trait]
pub trait Launcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidates tried in order; the next one runs only if the previous
    /// program is missing.
    fn app_commands(&self, application_name: &str) -> Vec<ToolCommand>;

    fn url_command(&self, url: &str) -> ToolCommand;

    async fn open_application(&self, application_name: &str) -> AgentResult<()> {
        info!(launcher = self.name(), "Opening application '{}'", application_name);
        let mut last = ToolFailure::Missing("launcher".to_string());

        for cmd in self.app_commands(application_name) {
            match run_tool(cmd, TOOL_TIMEOUT).await {
                Ok(_) => {
                    sleep(APP_SETTLE).await;
                    return Ok(());
                }
                Err(ToolFailure::Missing(program)) => {
                    warn!("'{}' not found, trying next launcher", program);
                    last = ToolFailure::Missing(program);
                }
                Err(failure) => {
                    last = failure;
                    break;
                }
            }
        }

        Err(AgentError::DesktopControl(format!(
            "failed to open application '{}': {}",
            application_name, last
        )))
    }

    async fn navigate_url(&self, url: &str) -> AgentResult<()> {
        info!(launcher = self.name(), "Opening URL {}", url);
        run_tool(self.url_command(url), TOOL_TIMEOUT)
            .await
            .map_err(|e| AgentError::DesktopControl(format!("failed to open '{}': {}", url, e)))?;
        sleep(URL_SETTLE).await;
        Ok(())
    }
}

pub struct MacLauncher;

impl Launcher for MacLauncher {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn app_commands(&self, application_name: &str) -> Vec<ToolCommand> {
        vec![ToolCommand::new("open", &["-a", application_name])]
    }

    fn url_command(&self, url: &str) -> ToolCommand {
        ToolCommand::new("open", &[url])
    }
}

pub struct LinuxLauncher;

impl Launcher for LinuxLauncher {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn app_commands(&self, application_name: &str) -> Vec<ToolCommand> {
        vec![
            ToolCommand::new(application_name, &[]).detached(),
            ToolCommand::new("xdg-open", &[application_name]),
        ]
    }

    fn url_command(&self, url: &str) -> ToolCommand {
        ToolCommand::new("xdg-open", &[url])
    }
}

pub struct WindowsLauncher;

impl Launcher for WindowsLauncher {
    fn name(&self) -> &'static str {
        "windows"
    }

    // The empty argument is the window title `start` expects before the target.
    fn app_commands(&self, application_name: &str) -> Vec<ToolCommand> {
        vec![ToolCommand::new("cmd", &["/C", "start", "", application_name])]
    }

    fn url_command(&self, url: &str) -> ToolCommand {
        ToolCommand::new("cmd", &["/C", "start", "", url])
    }
}

pub fn platform_launcher() -> AgentResult<Box<dyn Launcher>> {
    match std::env::consts::OS {
        "macos" => Ok(Box::new(MacLauncher)),
        "linux" | "freebsd" | "openbsd" => Ok(Box::new(LinuxLauncher)),
        "windows" => Ok(Box::new(WindowsLauncher)),
        other => Err(AgentError::Config(format!("no application launcher for {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_uses_open() {
        assert_eq!(
            MacLauncher.app_commands("Notes"),
            vec![ToolCommand::new("open", &["-a", "Notes"])]
        );
        assert_eq!(MacLauncher.url_command("https://x.io"), ToolCommand::new("open", &["https://x.io"]));
    }

    #[test]
    fn linux_spawns_then_falls_back() {
        let cmds = LinuxLauncher.app_commands("gedit");
        assert_eq!(cmds.len(), 2);
        assert!(cmds[0].detach);
        assert_eq!(cmds[0].program, "gedit");
        assert_eq!(cmds[1], ToolCommand::new("xdg-open", &["gedit"]));
    }

    #[test]
    fn windows_uses_start() {
        assert_eq!(
            WindowsLauncher.url_command("https://x.io").args,
            vec!["/C", "start", "", "https://x.io"]
        );
    }

    struct MissingEverything;

    impl Launcher for MissingEverything {
        fn name(&self) -> &'static str {
            "test"
        }
        fn app_commands(&self, _: &str) -> Vec<ToolCommand> {
            vec![
                ToolCommand::new("no-such-launcher-a1", &[]),
                ToolCommand::new("no-such-launcher-b2", &[]),
            ]
        }
        fn url_command(&self, _: &str) -> ToolCommand {
            ToolCommand::new("no-such-launcher-c3", &[])
        }
    }

    #[tokio::test]
    async fn all_candidates_missing_is_desktop_error() {
        let err = MissingEverything.open_application("Notes").await.unwrap_err();
        assert!(matches!(err, AgentError::DesktopControl(ref m) if m.contains("no-such-launcher-b2")));

        let err = MissingEverything.navigate_url("https://x.io").await.unwrap_err();
        assert!(matches!(err, AgentError::DesktopControl(_)));
    }
}
