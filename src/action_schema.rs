use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ValidationError;

pub const DISCRIMINANT: &str = "action";

pub const DEFAULT_TYPE_INTERVAL: f64 = 0.01;
pub const DEFAULT_MOVE_DURATION: f64 = 0.2;
pub const DEFAULT_SCROLL_AMOUNT: u32 = 10;
pub const DEFAULT_WAIT_MS: u64 = 1000;
/// Ceiling for per-keystroke intervals and mouse-move durations, in seconds.
pub const MAX_PAUSE_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Where a click lands: explicit coordinates, a visual description to ground,
/// or (unresolvably) neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PointerTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PointerTarget {
    pub fn at(x: i32, y: i32) -> Self {
        Self { x: Some(x), y: Some(y), description: None }
    }

    pub fn described(description: &str) -> Self {
        Self { x: None, y: None, description: Some(description.to_string()) }
    }

    /// Both coordinates, or nothing. A lone `x` or `y` is not a location.
    pub fn coordinates(&self) -> Option<(i32, i32)> {
        match (self.x, self.y) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Click(PointerTarget),
    DoubleClick(PointerTarget),
    TypeText {
        text: String,
        interval: f64,
    },
    PressKey {
        key_name: String,
    },
    MoveMouse {
        x: i32,
        y: i32,
        duration: f64,
    },
    Scroll {
        direction: ScrollDirection,
        amount: u32,
    },
    OpenApplication {
        application_name: String,
    },
    #[serde(rename = "NAVIGATE_TO_WEBSITE")]
    NavigateUrl {
        url: String,
    },
    TakeScreenshot,
    AnalyzeScreenshot {
        prompt: String,
    },
    Wait {
        duration_ms: u64,
    },
    /// Planner bookkeeping only; the engine does not act on it.
    FindApp {
        app_name: String,
    },
    TaskComplete {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    TaskFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Click(_) => "CLICK",
            ActionKind::DoubleClick(_) => "DOUBLE_CLICK",
            ActionKind::TypeText { .. } => "TYPE_TEXT",
            ActionKind::PressKey { .. } => "PRESS_KEY",
            ActionKind::MoveMouse { .. } => "MOVE_MOUSE",
            ActionKind::Scroll { .. } => "SCROLL",
            ActionKind::OpenApplication { .. } => "OPEN_APPLICATION",
            ActionKind::NavigateUrl { .. } => "NAVIGATE_TO_WEBSITE",
            ActionKind::TakeScreenshot => "TAKE_SCREENSHOT",
            ActionKind::AnalyzeScreenshot { .. } => "ANALYZE_SCREENSHOT",
            ActionKind::Wait { .. } => "WAIT",
            ActionKind::FindApp { .. } => "FIND_APP",
            ActionKind::TaskComplete { .. } => "TASK_COMPLETE",
            ActionKind::TaskFailed { .. } => "TASK_FAILED",
        }
    }
}

/// One validated plan step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self { kind, reason: None }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ActionKind::TaskComplete { .. } | ActionKind::TaskFailed { .. })
    }

    /// Canonical wire form: aliases normalised, defaults filled in, absent
    /// optionals omitted. Decoding it yields an identical `Action`.
    pub fn to_raw(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ActionKind::Click(t) | ActionKind::DoubleClick(t) => match (t.coordinates(), &t.description) {
                (Some((x, y)), _) => write!(f, "{} at ({}, {})", self.name(), x, y),
                (None, Some(desc)) => write!(f, "{} on '{}'", self.name(), desc),
                (None, None) => write!(f, "{} (no target)", self.name()),
            },
            ActionKind::TypeText { text, .. } => {
                let preview: String = text.chars().take(50).collect();
                let ellipsis = if text.chars().count() > 50 { "..." } else { "" };
                write!(f, "TYPE_TEXT '{}{}'", preview, ellipsis)
            }
            ActionKind::PressKey { key_name } => write!(f, "PRESS_KEY {}", key_name),
            ActionKind::MoveMouse { x, y, .. } => write!(f, "MOVE_MOUSE to ({}, {})", x, y),
            ActionKind::Scroll { direction, amount } => {
                write!(f, "SCROLL {} x{}", direction.as_str(), amount)
            }
            ActionKind::OpenApplication { application_name } => {
                write!(f, "OPEN_APPLICATION {}", application_name)
            }
            ActionKind::NavigateUrl { url } => write!(f, "NAVIGATE_TO_WEBSITE {}", url),
            ActionKind::AnalyzeScreenshot { prompt } => write!(f, "ANALYZE_SCREENSHOT '{}'", prompt),
            ActionKind::Wait { duration_ms } => write!(f, "WAIT {}ms", duration_ms),
            ActionKind::FindApp { app_name } => write!(f, "FIND_APP {}", app_name),
            _ => write!(f, "{}", self.name()),
        }
    }
}

// =====================================================
// DECODING
// =====================================================

type Decoder = fn(&Map<String, Value>) -> Result<ActionKind, ValidationError>;

/// Discriminant -> decoder. `NAVIGATE_URL` is accepted as an input alias.
const DECODERS: &[(&str, Decoder)] = &[
    ("CLICK", decode_click),
    ("DOUBLE_CLICK", decode_double_click),
    ("TYPE_TEXT", decode_type_text),
    ("PRESS_KEY", decode_press_key),
    ("MOVE_MOUSE", decode_move_mouse),
    ("SCROLL", decode_scroll),
    ("OPEN_APPLICATION", decode_open_application),
    ("NAVIGATE_TO_WEBSITE", decode_navigate),
    ("NAVIGATE_URL", decode_navigate),
    ("TAKE_SCREENSHOT", decode_take_screenshot),
    ("ANALYZE_SCREENSHOT", decode_analyze_screenshot),
    ("WAIT", decode_wait),
    ("FIND_APP", decode_find_app),
    ("TASK_COMPLETE", decode_task_complete),
    ("TASK_FAILED", decode_task_failed),
];

pub fn known_discriminants() -> impl Iterator<Item = &'static str> {
    DECODERS.iter().map(|(name, _)| *name)
}

/// Decode one raw step into an `Action`. Pure; no side effects.
pub fn decode_action(raw: &Value) -> Result<Action, ValidationError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ValidationError::new(DISCRIMINANT, "step must be a JSON object"))?;

    let discriminant = match obj.get(DISCRIMINANT) {
        None | Some(Value::Null) => return Err(ValidationError::missing(DISCRIMINANT)),
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(ValidationError::new(DISCRIMINANT, "must be a string")),
    };

    let decoder = DECODERS
        .iter()
        .find(|(name, _)| *name == discriminant)
        .map(|(_, decoder)| *decoder)
        .ok_or_else(|| {
            ValidationError::new(DISCRIMINANT, format!("unknown action '{}'", discriminant))
        })?;

    let kind = decoder(obj)?;
    let reason = opt_string(obj, "reason")?;
    Ok(Action { kind, reason })
}

fn decode_pointer(obj: &Map<String, Value>) -> Result<PointerTarget, ValidationError> {
    Ok(PointerTarget {
        x: opt_i32(obj, "x")?,
        y: opt_i32(obj, "y")?,
        description: opt_string(obj, "description")?,
    })
}

fn decode_click(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::Click(decode_pointer(obj)?))
}

fn decode_double_click(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::DoubleClick(decode_pointer(obj)?))
}

fn decode_type_text(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    let text = opt_string(obj, "text")?.ok_or_else(|| ValidationError::missing("text"))?;
    let interval = opt_non_negative(obj, "interval")?.unwrap_or(DEFAULT_TYPE_INTERVAL);
    Ok(ActionKind::TypeText { text, interval })
}

fn decode_press_key(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::PressKey { key_name: req_non_empty(obj, "key_name")? })
}

fn decode_move_mouse(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    let x = opt_i32(obj, "x")?.ok_or_else(|| ValidationError::missing("x"))?;
    let y = opt_i32(obj, "y")?.ok_or_else(|| ValidationError::missing("y"))?;
    let duration = opt_non_negative(obj, "duration")?.unwrap_or(DEFAULT_MOVE_DURATION);
    Ok(ActionKind::MoveMouse { x, y, duration })
}

fn decode_scroll(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    let raw = opt_string(obj, "direction")?.ok_or_else(|| ValidationError::missing("direction"))?;
    let direction = ScrollDirection::parse(&raw).ok_or_else(|| {
        ValidationError::new(
            "direction",
            format!("'{}' is not one of up, down, left, right", raw),
        )
    })?;
    let amount = match opt_int(obj, "amount")? {
        None => DEFAULT_SCROLL_AMOUNT,
        Some(n) => u32::try_from(n)
            .map_err(|_| ValidationError::new("amount", format!("{} is out of range (0..=u32::MAX)", n)))?,
    };
    Ok(ActionKind::Scroll { direction, amount })
}

fn decode_open_application(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::OpenApplication { application_name: req_non_empty(obj, "application_name")? })
}

fn decode_navigate(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::NavigateUrl { url: req_non_empty(obj, "url")? })
}

fn decode_take_screenshot(_obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::TakeScreenshot)
}

fn decode_analyze_screenshot(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::AnalyzeScreenshot { prompt: req_non_empty(obj, "prompt")? })
}

fn decode_wait(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    let duration_ms = match opt_int(obj, "duration_ms")? {
        None => DEFAULT_WAIT_MS,
        Some(n) if n < 0 => {
            return Err(ValidationError::new("duration_ms", format!("must be >= 0, got {}", n)))
        }
        Some(n) => n as u64,
    };
    Ok(ActionKind::Wait { duration_ms })
}

fn decode_find_app(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::FindApp { app_name: req_non_empty(obj, "app_name")? })
}

fn decode_task_complete(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::TaskComplete { message: opt_string(obj, "message")? })
}

fn decode_task_failed(obj: &Map<String, Value>) -> Result<ActionKind, ValidationError> {
    Ok(ActionKind::TaskFailed { message: opt_string(obj, "message")? })
}

// --- field readers ---
// `null` counts as absent everywhere.

fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn opt_string(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, ValidationError> {
    match present(obj, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::new(key, "must be a string")),
    }
}

fn req_non_empty(obj: &Map<String, Value>, key: &str) -> Result<String, ValidationError> {
    let value = opt_string(obj, key)?.ok_or_else(|| ValidationError::missing(key))?;
    if value.trim().is_empty() {
        return Err(ValidationError::new(key, "must not be empty"));
    }
    Ok(value)
}

fn opt_int(obj: &Map<String, Value>, key: &str) -> Result<Option<i64>, ValidationError> {
    let Some(value) = present(obj, key) else {
        return Ok(None);
    };
    let Value::Number(n) = value else {
        return Err(ValidationError::new(key, "must be an integer"));
    };
    if let Some(i) = n.as_i64() {
        return Ok(Some(i));
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => Ok(Some(f as i64)),
        _ => Err(ValidationError::new(key, format!("must be an integer, got {}", n))),
    }
}

fn opt_i32(obj: &Map<String, Value>, key: &str) -> Result<Option<i32>, ValidationError> {
    match opt_int(obj, key)? {
        None => Ok(None),
        Some(n) => i32::try_from(n)
            .map(Some)
            .map_err(|_| ValidationError::new(key, format!("{} does not fit a screen coordinate", n))),
    }
}

fn opt_non_negative(obj: &Map<String, Value>, key: &str) -> Result<Option<f64>, ValidationError> {
    let Some(value) = present(obj, key) else {
        return Ok(None);
    };
    let f = value
        .as_f64()
        .ok_or_else(|| ValidationError::new(key, "must be a number"))?;
    if !f.is_finite() || f < 0.0 {
        return Err(ValidationError::new(key, format!("must be a finite number >= 0, got {}", f)));
    }
    if f > MAX_PAUSE_SECS {
        return Err(ValidationError::new(key, format!("must be at most {} seconds, got {}", MAX_PAUSE_SECS, f)));
    }
    Ok(Some(f))
}

// =====================================================
// CATALOG (drives the planner prompt)
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Decimal,
    OneOf(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<&'static str>,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ActionSpec {
    pub name: &'static str,
    pub summary: &'static str,
    pub fields: &'static [FieldSpec],
}

const fn field(
    name: &'static str,
    ty: FieldType,
    required: bool,
    default: Option<&'static str>,
    description: &'static str,
) -> FieldSpec {
    FieldSpec { name, ty, required, default, description }
}

const POINTER_FIELDS: &[FieldSpec] = &[
    field("x", FieldType::Integer, false, None, "X-coordinate in screen pixels"),
    field("y", FieldType::Integer, false, None, "Y-coordinate in screen pixels"),
    field(
        "description",
        FieldType::String,
        false,
        None,
        "Visual description of the target, used when coordinates are unknown",
    ),
];

pub const ACTION_CATALOG: &[ActionSpec] = &[
    ActionSpec { name: "ANALYZE_SCREENSHOT", summary: "Capture the screen and ask the vision model a question about it", fields: &[
        field("prompt", FieldType::String, true, None, "Question or instruction for the vision model"),
    ]},
    ActionSpec { name: "CLICK", summary: "Single left click", fields: POINTER_FIELDS },
    ActionSpec { name: "DOUBLE_CLICK", summary: "Double left click", fields: POINTER_FIELDS },
    ActionSpec { name: "FIND_APP", summary: "Note which application you are looking for (no effect on the desktop)", fields: &[
        field("app_name", FieldType::String, true, None, "Name of the application being located"),
    ]},
    ActionSpec { name: "MOVE_MOUSE", summary: "Move the pointer", fields: &[
        field("x", FieldType::Integer, true, None, "X-coordinate"),
        field("y", FieldType::Integer, true, None, "Y-coordinate"),
        field("duration", FieldType::Decimal, false, Some("0.2"), "Seconds the move animation takes"),
    ]},
    ActionSpec { name: "NAVIGATE_TO_WEBSITE", summary: "Open a URL in the default browser", fields: &[
        field("url", FieldType::String, true, None, "Absolute URL"),
    ]},
    ActionSpec { name: "OPEN_APPLICATION", summary: "Launch or focus an application", fields: &[
        field("application_name", FieldType::String, true, None, "Application name as the OS knows it"),
    ]},
    ActionSpec { name: "PRESS_KEY", summary: "Press a single special key", fields: &[
        field("key_name", FieldType::String, true, None, "Key name, e.g. 'enter', 'f5', 'esc'"),
    ]},
    ActionSpec { name: "SCROLL", summary: "Scroll the focused view", fields: &[
        field("direction", FieldType::OneOf(&["up", "down", "left", "right"]), true, None, ""),
        field("amount", FieldType::Integer, false, Some("10"), "Scroll magnitude in wheel notches"),
    ]},
    ActionSpec { name: "TAKE_SCREENSHOT", summary: "Capture the screen", fields: &[] },
    ActionSpec { name: "TASK_COMPLETE", summary: "The command has been carried out; must be the last step", fields: &[
        field("message", FieldType::String, false, None, "Short summary for the user"),
    ]},
    ActionSpec { name: "TASK_FAILED", summary: "The command cannot be carried out; must be the last step", fields: &[
        field("message", FieldType::String, false, None, "Why the command cannot be done"),
    ]},
    ActionSpec { name: "TYPE_TEXT", summary: "Type text into the focused element", fields: &[
        field("text", FieldType::String, true, None, "Text to type"),
        field("interval", FieldType::Decimal, false, Some("0.01"), "Seconds between keystrokes"),
    ]},
    ActionSpec { name: "WAIT", summary: "Pause before the next step", fields: &[
        field("duration_ms", FieldType::Integer, false, Some("1000"), "Milliseconds to wait"),
    ]},
];
