pub mod launcher;
#[cfg(target_os = "macos")]
pub mod macos;
pub mod xdotool;

use std::fmt;
use std::io::{Cursor, ErrorKind};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::action_schema::ScrollDirection;
use crate::error::{AgentError, AgentResult};

pub use launcher::{platform_launcher, Launcher};

/// Mouse, keyboard and screen of the local machine. Pointer operations check
/// their coordinates against `get_screen_size` first.
#[async_trait]
pub trait DesktopController: Send + Sync {
    async fn click(&self, x: i32, y: i32) -> AgentResult<()>;
    async fn double_click(&self, x: i32, y: i32) -> AgentResult<()>;
    async fn type_text(&self, text: &str, interval: f64) -> AgentResult<()>;
    async fn press_key(&self, key_name: &str) -> AgentResult<()>;
    async fn move_mouse(&self, x: i32, y: i32, duration: f64) -> AgentResult<()>;
    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> AgentResult<()>;
    async fn open_application(&self, application_name: &str) -> AgentResult<()>;
    async fn navigate_url(&self, url: &str) -> AgentResult<()>;
    /// PNG bytes of the whole screen.
    async fn take_screenshot(&self) -> AgentResult<Vec<u8>>;
    async fn get_screen_size(&self) -> AgentResult<(u32, u32)>;
}

/// Picks the input backend for the running OS.
pub fn platform_controller() -> AgentResult<Arc<dyn DesktopController>> {
    let launcher = platform_launcher()?;

    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(macos::MacController::new(launcher)?))
    }
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(xdotool::XdotoolController::new(launcher)?))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = launcher;
        Err(AgentError::Config(format!(
            "no desktop input backend for {}",
            std::env::consts::OS
        )))
    }
}

pub fn check_bounds(x: i32, y: i32, (width, height): (u32, u32)) -> AgentResult<()> {
    let inside = x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height;
    if inside {
        Ok(())
    } else {
        Err(AgentError::DesktopControl(format!(
            "coordinates ({}, {}) are outside the {}x{} screen",
            x, y, width, height
        )))
    }
}

/// Seconds from a plan step as a `Duration`, rejecting values a sleep cannot hold.
pub fn pause(seconds: f64) -> AgentResult<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| AgentError::DesktopControl(format!("invalid pause of {} seconds: {}", seconds, e)))
}

// =====================================================
// KEYS
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Printable character, typed as-is.
    Char(char),
    /// Special key: X11 keysym and macOS virtual key code.
    Named { keysym: &'static str, mac_code: u16 },
}

const fn named(keysym: &'static str, mac_code: u16) -> Key {
    Key::Named { keysym, mac_code }
}

const NAMED_KEYS: &[(&str, Key)] = &[
    ("enter", named("Return", 36)),
    ("return", named("Return", 36)),
    ("tab", named("Tab", 48)),
    ("space", named("space", 49)),
    ("backspace", named("BackSpace", 51)),
    ("delete", named("Delete", 117)),
    ("del", named("Delete", 117)),
    ("esc", named("Escape", 53)),
    ("escape", named("Escape", 53)),
    ("up", named("Up", 126)),
    ("down", named("Down", 125)),
    ("left", named("Left", 123)),
    ("right", named("Right", 124)),
    ("home", named("Home", 115)),
    ("end", named("End", 119)),
    ("pageup", named("Prior", 116)),
    ("pgup", named("Prior", 116)),
    ("pagedown", named("Next", 121)),
    ("pgdn", named("Next", 121)),
    ("insert", named("Insert", 114)),
    ("capslock", named("Caps_Lock", 57)),
    ("shift", named("Shift_L", 56)),
    ("ctrl", named("Control_L", 59)),
    ("control", named("Control_L", 59)),
    ("alt", named("Alt_L", 58)),
    ("option", named("Alt_L", 58)),
    ("command", named("Super_L", 55)),
    ("cmd", named("Super_L", 55)),
    ("win", named("Super_L", 55)),
    ("super", named("Super_L", 55)),
    ("f1", named("F1", 122)),
    ("f2", named("F2", 120)),
    ("f3", named("F3", 99)),
    ("f4", named("F4", 118)),
    ("f5", named("F5", 96)),
    ("f6", named("F6", 97)),
    ("f7", named("F7", 98)),
    ("f8", named("F8", 100)),
    ("f9", named("F9", 101)),
    ("f10", named("F10", 109)),
    ("f11", named("F11", 103)),
    ("f12", named("F12", 111)),
];

/// Case-insensitive key lookup. Single printable ASCII characters are always
/// accepted; anything else must be in the named-key table.
pub fn resolve_key(key_name: &str) -> AgentResult<Key> {
    let normalized = key_name.trim().to_lowercase();

    let mut chars = normalized.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_graphic() {
            return Ok(Key::Char(c));
        }
    }

    NAMED_KEYS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, key)| *key)
        .ok_or_else(|| AgentError::DesktopControl(format!("invalid key name: '{}'", key_name)))
}

// =====================================================
// SCREENSHOTS
// =====================================================

/// Decode whatever the capture tool produced and re-encode it as PNG. When
/// `logical_size` is smaller than the capture (HiDPI), the image is scaled
/// down so pixel positions match pointer coordinates.
pub fn normalize_png(raw: &[u8], logical_size: Option<(u32, u32)>) -> AgentResult<Vec<u8>> {
    let img = image::load_from_memory(raw)
        .map_err(|e| AgentError::ScreenCapture(format!("capture is not a readable image: {}", e)))?;

    let img = match logical_size {
        Some((w, h)) if w > 0 && h > 0 && (img.width() > w || img.height() > h) => {
            img.resize_exact(w, h, image::imageops::FilterType::Triangle)
        }
        _ => img,
    };

    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageOutputFormat::Png)
        .map_err(|e| AgentError::ScreenCapture(format!("PNG encoding failed: {}", e)))?;
    Ok(buffer.into_inner())
}

// =====================================================
// EXTERNAL TOOLS
// =====================================================

pub const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// One external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Start and return immediately instead of waiting for exit.
    pub detach: bool,
}

impl ToolCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            detach: false,
        }
    }

    pub fn detached(mut self) -> Self {
        self.detach = true;
        self
    }

    fn run_blocking(&self) -> Result<Vec<u8>, ToolFailure> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);

        if self.detach {
            command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
            return match command.spawn() {
                Ok(_) => Ok(Vec::new()),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(ToolFailure::Missing(self.program.clone())),
                Err(e) => Err(ToolFailure::Failed(format!("{}: {}", self.program, e))),
            };
        }

        let output = match command.output() {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ToolFailure::Missing(self.program.clone())),
            Err(e) => return Err(ToolFailure::Failed(format!("{}: {}", self.program, e))),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ToolFailure::Failed(format!(
                "{} exited with {}: {}",
                self.program, output.status, stderr
            )));
        }
        Ok(output.stdout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    Missing(String),
    Failed(String),
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolFailure::Missing(program) => write!(f, "'{}' is not installed or not on PATH", program),
            ToolFailure::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

/// Run a blocking program off the async runtime, bounded by `limit`.
pub async fn run_tool(cmd: ToolCommand, limit: Duration) -> Result<Vec<u8>, ToolFailure> {
    let label = cmd.program.clone();
    let task = tokio::task::spawn_blocking(move || cmd.run_blocking());
    match timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ToolFailure::Failed(format!("{} task panicked: {}", label, e))),
        Err(_) => Err(ToolFailure::Failed(format!("{} timed out after {:?}", label, limit))),
    }
}

pub(crate) fn desktop_error(e: ToolFailure) -> AgentError {
    AgentError::DesktopControl(e.to_string())
}
