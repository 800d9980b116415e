use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use core_graphics::display::CGDisplay;
use core_graphics::event::{
    CGEvent, CGEventTapLocation, CGEventType, CGMouseButton, EventField, ScrollEventUnit,
};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use core_graphics::geometry::CGPoint;
use tracing::{debug, info};

use super::{
    check_bounds, desktop_error, normalize_png, pause, resolve_key, run_tool, DesktopController,
    Key, Launcher, ToolCommand, TOOL_TIMEOUT,
};
use crate::action_schema::ScrollDirection;
use crate::error::{AgentError, AgentResult};

/// macOS backend: Quartz events for pointer and text, System Events for
/// special keys, `screencapture` for the screen. Needs Accessibility and
/// Screen Recording permission.
pub struct MacController {
    launcher: Box<dyn Launcher>,
}

impl MacController {
    pub fn new(launcher: Box<dyn Launcher>) -> AgentResult<Self> {
        info!(launcher = launcher.name(), "macOS desktop backend ready");
        Ok(Self { launcher })
    }

    async fn post_events<F>(&self, label: &'static str, work: F) -> AgentResult<()>
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(work);
        match tokio::time::timeout(TOOL_TIMEOUT, task).await {
            Ok(Ok(result)) => result.map_err(|e| AgentError::DesktopControl(format!("{}: {}", label, e))),
            Ok(Err(e)) => Err(AgentError::DesktopControl(format!("{} task panicked: {}", label, e))),
            Err(_) => Err(AgentError::DesktopControl(format!("{} timed out", label))),
        }
    }

    async fn click_times(&self, x: i32, y: i32, times: i64) -> AgentResult<()> {
        check_bounds(x, y, self.get_screen_size().await?)?;
        self.post_events("click", move || {
            let point = CGPoint::new(x as f64, y as f64);
            for click in 1..=times {
                for kind in [CGEventType::LeftMouseDown, CGEventType::LeftMouseUp] {
                    let event = CGEvent::new_mouse_event(source()?, kind, point, CGMouseButton::Left)
                        .map_err(|_| "failed to create mouse event".to_string())?;
                    event.set_integer_value_field(EventField::MOUSE_EVENT_CLICK_STATE, click);
                    event.post(CGEventTapLocation::HID);
                }
                thread::sleep(Duration::from_millis(30));
            }
            Ok(())
        })
        .await
    }
}

fn source() -> Result<CGEventSource, String> {
    CGEventSource::new(CGEventSourceStateID::HIDSystemState)
        .map_err(|_| "failed to create event source".to_string())
}

fn move_to(point: CGPoint) -> Result<(), String> {
    let event = CGEvent::new_mouse_event(source()?, CGEventType::MouseMoved, point, CGMouseButton::Left)
        .map_err(|_| "failed to create move event".to_string())?;
    event.post(CGEventTapLocation::HID);
    Ok(())
}

fn current_location() -> Result<CGPoint, String> {
    CGEvent::new(source()?)
        .map(|e| e.location())
        .map_err(|_| "failed to read pointer location".to_string())
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl DesktopController for MacController {
    async fn click(&self, x: i32, y: i32) -> AgentResult<()> {
        info!("Click at ({}, {})", x, y);
        self.click_times(x, y, 1).await
    }

    async fn double_click(&self, x: i32, y: i32) -> AgentResult<()> {
        info!("Double click at ({}, {})", x, y);
        self.click_times(x, y, 2).await
    }

    async fn type_text(&self, text: &str, interval: f64) -> AgentResult<()> {
        let text = text.to_string();
        let key_pause = pause(interval)?;
        self.post_events("type", move || {
            for c in text.chars() {
                let s = c.to_string();
                for down in [true, false] {
                    let event = CGEvent::new_keyboard_event(source()?, 0, down)
                        .map_err(|_| "failed to create keyboard event".to_string())?;
                    event.set_string(&s);
                    event.post(CGEventTapLocation::HID);
                }
                thread::sleep(key_pause);
            }
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key_name: &str) -> AgentResult<()> {
        let script = match resolve_key(key_name)? {
            Key::Named { mac_code, .. } => {
                format!("tell application \"System Events\" to key code {}", mac_code)
            }
            Key::Char(c) => format!(
                "tell application \"System Events\" to keystroke \"{}\"",
                escape_applescript(&c.to_string())
            ),
        };
        debug!("osascript: {}", script);
        run_tool(ToolCommand::new("osascript", &["-e", &script]), TOOL_TIMEOUT)
            .await
            .map_err(desktop_error)?;
        Ok(())
    }

    async fn move_mouse(&self, x: i32, y: i32, duration: f64) -> AgentResult<()> {
        check_bounds(x, y, self.get_screen_size().await?)?;
        let steps = ((duration * 60.0).round() as u32).max(1);
        let step_pause = pause(duration / steps as f64)?;
        self.post_events("move", move || {
            let target = CGPoint::new(x as f64, y as f64);
            if steps == 1 {
                return move_to(target);
            }
            let start = current_location()?;
            for i in 1..=steps {
                let t = i as f64 / steps as f64;
                move_to(CGPoint::new(
                    start.x + (target.x - start.x) * t,
                    start.y + (target.y - start.y) * t,
                ))?;
                thread::sleep(step_pause);
            }
            Ok(())
        })
        .await
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> AgentResult<()> {
        let lines = i32::try_from(amount).unwrap_or(i32::MAX);
        let (vertical, horizontal) = match direction {
            ScrollDirection::Up => (lines, 0),
            ScrollDirection::Down => (-lines, 0),
            ScrollDirection::Left => (0, lines),
            ScrollDirection::Right => (0, -lines),
        };
        self.post_events("scroll", move || {
            let event = CGEvent::new_scroll_event(source()?, ScrollEventUnit::LINE, 2, vertical, horizontal, 0)
                .map_err(|_| "failed to create scroll event".to_string())?;
            event.post(CGEventTapLocation::HID);
            Ok(())
        })
        .await
    }

    async fn open_application(&self, application_name: &str) -> AgentResult<()> {
        self.launcher.open_application(application_name).await
    }

    async fn navigate_url(&self, url: &str) -> AgentResult<()> {
        self.launcher.navigate_url(url).await
    }

    async fn take_screenshot(&self) -> AgentResult<Vec<u8>> {
        let path = std::env::temp_dir().join(format!("desktop_agent_{}.png", uuid::Uuid::new_v4()));
        let path_arg = path.to_string_lossy().to_string();

        run_tool(ToolCommand::new("screencapture", &["-x", "-t", "png", &path_arg]), TOOL_TIMEOUT)
            .await
            .map_err(|e| AgentError::ScreenCapture(e.to_string()))?;

        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| AgentError::ScreenCapture(format!("cannot read capture: {}", e)))?;
        let _ = tokio::fs::remove_file(&path).await;

        // Retina captures are scaled to point size so pixels match clicks.
        normalize_png(&raw, Some(self.get_screen_size().await?))
    }

    async fn get_screen_size(&self) -> AgentResult<(u32, u32)> {
        let bounds = CGDisplay::main().bounds();
        let (w, h) = (bounds.size.width as u32, bounds.size.height as u32);
        if w == 0 || h == 0 {
            return Err(AgentError::DesktopControl("main display reports zero size".to_string()));
        }
        Ok((w, h))
    }
}
