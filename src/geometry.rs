use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoxError {
    #[error("bounding box coordinates must be non-negative")]
    Negative,
    #[error("{0}_max must be strictly greater than {0}_min")]
    EmptyExtent(char),
    #[error("bounding box needs exactly four coordinates, got {0}")]
    WrongArity(usize),
    #[error("bounding box is malformed: {0}")]
    Malformed(String),
    #[error("relative bounding box without a frame size")]
    RelativeWithoutFrame,
    #[error("bounding box coordinate {0} is out of range")]
    OutOfRange(f64),
}

/// Screen rectangle `[x_min, y_min, x_max, y_max]` in pixels. Only
/// constructible with non-negative coordinates and a positive extent on both
/// axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    x_min: i32,
    y_min: i32,
    x_max: i32,
    y_max: i32,
}

impl BoundingBox {
    pub fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Result<Self, BoxError> {
        if x_min < 0 || y_min < 0 || x_max < 0 || y_max < 0 {
            return Err(BoxError::Negative);
        }
        if x_max <= x_min {
            return Err(BoxError::EmptyExtent('x'));
        }
        if y_max <= y_min {
            return Err(BoxError::EmptyExtent('y'));
        }
        Ok(Self { x_min, y_min, x_max, y_max })
    }

    pub fn from_slice(coords: &[i32]) -> Result<Self, BoxError> {
        match coords {
            [x_min, y_min, x_max, y_max] => Self::new(*x_min, *y_min, *x_max, *y_max),
            _ => Err(BoxError::WrongArity(coords.len())),
        }
    }

    /// Read a box from JSON: `[x_min, y_min, x_max, y_max]` or an object with
    /// those keys. Values that all sit in `[0, 1]` with at least one fraction
    /// are treated as ratios of `frame` (width, height).
    pub fn from_json(value: &Value, frame: Option<(u32, u32)>) -> Result<Self, BoxError> {
        let raw: Vec<f64> = match value {
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_f64().ok_or_else(|| BoxError::Malformed("values must be numbers".to_string())))
                .collect::<Result<_, _>>()?,
            Value::Object(obj) => ["x_min", "y_min", "x_max", "y_max"]
                .iter()
                .map(|k| {
                    obj.get(*k)
                        .and_then(Value::as_f64)
                        .ok_or_else(|| BoxError::Malformed(format!("missing numeric '{}'", k)))
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(BoxError::Malformed("expected an array or an object".to_string())),
        };

        if raw.len() != 4 {
            return Err(BoxError::WrongArity(raw.len()));
        }

        let is_ratio = raw.iter().all(|v| (0.0..=1.0).contains(v)) && raw.iter().any(|v| v.fract() != 0.0);
        let scaled: Vec<f64> = if is_ratio {
            let (w, h) = frame.ok_or(BoxError::RelativeWithoutFrame)?;
            vec![raw[0] * w as f64, raw[1] * h as f64, raw[2] * w as f64, raw[3] * h as f64]
        } else {
            raw
        };

        let ints = scaled
            .iter()
            .map(|v| {
                let rounded = v.round();
                if rounded < i32::MIN as f64 || rounded > i32::MAX as f64 {
                    Err(BoxError::OutOfRange(*v))
                } else {
                    Ok(rounded as i32)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_slice(&ints)
    }

    pub fn x_min(&self) -> i32 {
        self.x_min
    }

    pub fn y_min(&self) -> i32 {
        self.y_min
    }

    pub fn x_max(&self) -> i32 {
        self.x_max
    }

    pub fn y_max(&self) -> i32 {
        self.y_max
    }

    /// Floor-divided midpoint on each axis.
    pub fn center(&self) -> Point {
        Point {
            x: self.x_min + (self.x_max - self.x_min) / 2,
            y: self.y_min + (self.y_max - self.y_min) / 2,
        }
    }
}
