use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    check_bounds, desktop_error, normalize_png, pause, resolve_key, run_tool, DesktopController,
    Key, Launcher, ToolCommand, TOOL_TIMEOUT,
};
use crate::action_schema::ScrollDirection;
use crate::error::{AgentError, AgentResult};

/// X11 backend: `xdotool` for input, ImageMagick `import` for capture.
pub struct XdotoolController {
    launcher: Box<dyn Launcher>,
}

impl XdotoolController {
    pub fn new(launcher: Box<dyn Launcher>) -> AgentResult<Self> {
        if std::env::var_os("DISPLAY").is_none() {
            return Err(AgentError::Config("DISPLAY is not set; an X11 session is required".to_string()));
        }
        info!(launcher = launcher.name(), "xdotool desktop backend ready");
        Ok(Self { launcher })
    }

    async fn xdotool(&self, args: &[&str]) -> AgentResult<Vec<u8>> {
        debug!("xdotool {}", args.join(" "));
        run_tool(ToolCommand::new("xdotool", args), TOOL_TIMEOUT)
            .await
            .map_err(desktop_error)
    }

    async fn click_times(&self, x: i32, y: i32, times: u32) -> AgentResult<()> {
        check_bounds(x, y, self.get_screen_size().await?)?;
        let (xs, ys, n) = (x.to_string(), y.to_string(), times.to_string());
        self.xdotool(&["mousemove", "--sync", &xs, &ys, "click", "--repeat", &n, "1"])
            .await?;
        Ok(())
    }
}

fn scroll_button(direction: ScrollDirection) -> &'static str {
    match direction {
        ScrollDirection::Up => "4",
        ScrollDirection::Down => "5",
        ScrollDirection::Left => "6",
        ScrollDirection::Right => "7",
    }
}

fn parse_geometry(stdout: &[u8]) -> AgentResult<(u32, u32)> {
    let text = String::from_utf8_lossy(stdout);
    let mut parts = text.split_whitespace().map(str::parse::<u32>);
    match (parts.next(), parts.next()) {
        (Some(Ok(w)), Some(Ok(h))) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(AgentError::DesktopControl(format!(
            "unexpected display geometry '{}'",
            text.trim()
        ))),
    }
}

#[async_trait]
impl DesktopController for XdotoolController {
    async fn click(&self, x: i32, y: i32) -> AgentResult<()> {
        info!("Click at ({}, {})", x, y);
        self.click_times(x, y, 1).await
    }

    async fn double_click(&self, x: i32, y: i32) -> AgentResult<()> {
        info!("Double click at ({}, {})", x, y);
        self.click_times(x, y, 2).await
    }

    async fn type_text(&self, text: &str, interval: f64) -> AgentResult<()> {
        let delay_ms = ((interval * 1000.0).round() as u64).to_string();
        self.xdotool(&["type", "--delay", &delay_ms, "--", text]).await?;
        Ok(())
    }

    async fn press_key(&self, key_name: &str) -> AgentResult<()> {
        let keysym = match resolve_key(key_name)? {
            Key::Named { keysym, .. } => keysym.to_string(),
            Key::Char(c) => c.to_string(),
        };
        info!("Press key {}", keysym);
        self.xdotool(&["key", "--clearmodifiers", &keysym]).await?;
        Ok(())
    }

    async fn move_mouse(&self, x: i32, y: i32, duration: f64) -> AgentResult<()> {
        check_bounds(x, y, self.get_screen_size().await?)?;
        let settle = pause(duration)?;
        // xdotool has no animated move; the duration is honoured as a pause.
        self.xdotool(&["mousemove", "--sync", &x.to_string(), &y.to_string()])
            .await?;
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> AgentResult<()> {
        if amount == 0 {
            return Ok(());
        }
        self.xdotool(&["click", "--repeat", &amount.to_string(), scroll_button(direction)])
            .await?;
        Ok(())
    }

    async fn open_application(&self, application_name: &str) -> AgentResult<()> {
        self.launcher.open_application(application_name).await
    }

    async fn navigate_url(&self, url: &str) -> AgentResult<()> {
        self.launcher.navigate_url(url).await
    }

    async fn take_screenshot(&self) -> AgentResult<Vec<u8>> {
        let raw = run_tool(ToolCommand::new("import", &["-window", "root", "png:-"]), TOOL_TIMEOUT)
            .await
            .map_err(|e| AgentError::ScreenCapture(e.to_string()))?;
        normalize_png(&raw, None)
    }

    async fn get_screen_size(&self) -> AgentResult<(u32, u32)> {
        let stdout = self.xdotool(&["getdisplaygeometry"]).await?;
        parse_geometry(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_parsed() {
        assert_eq!(parse_geometry(b"1920 1080\n").unwrap(), (1920, 1080));
        assert!(parse_geometry(b"").is_err());
        assert!(parse_geometry(b"0 0").is_err());
    }

    #[test]
    fn wheel_buttons() {
        assert_eq!(scroll_button(ScrollDirection::Up), "4");
        assert_eq!(scroll_button(ScrollDirection::Right), "7");
    }
}
