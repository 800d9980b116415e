pub mod replicate;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::AgentResult;
use crate::geometry::BoundingBox;

pub use replicate::ReplicateVision;

/// Remote image analysis. Returns the backend's raw mapping, which may hold
/// located elements, boxes, extracted text or a verification flag.
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn analyze_image(&self, image: &[u8], prompt: &str) -> AgentResult<Map<String, Value>>;
}

/// One element reported by the vision backend, in backend rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundElement {
    pub label: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub raw: Value,
}

/// Structured view over a raw analysis mapping. Unknown keys stay reachable
/// through `raw`.
#[derive(Debug, Clone, Default)]
pub struct VisionAnalysis {
    pub found_elements: Vec<FoundElement>,
    pub main_text_content: Option<String>,
    pub identified_element_bbox: Option<BoundingBox>,
    pub verification_passed: Option<bool>,
    pub raw: Map<String, Value>,
}

const ELEMENT_KEYS: &[&str] = &["elements", "found_elements", "parsed_content_list"];
const TEXT_KEYS: &[&str] = &["text", "main_text_content"];
const BBOX_KEYS: &[&str] = &["bounding_box", "bbox"];
const VERIFIED_KEYS: &[&str] = &["verification_passed", "verified"];
const LABEL_KEYS: &[&str] = &["text", "content", "label", "name"];

fn first_present<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k).filter(|v| !v.is_null()))
}

impl VisionAnalysis {
    /// `frame` is the analysed image's (width, height), used to scale ratio
    /// boxes to pixels.
    pub fn from_raw(raw: Map<String, Value>, frame: Option<(u32, u32)>) -> Self {
        let identified_element_bbox = first_present(&raw, BBOX_KEYS).and_then(|v| {
            BoundingBox::from_json(v, frame)
                .map_err(|e| warn!("Ignoring identified bounding box: {}", e))
                .ok()
        });

        let found_elements = match first_present(&raw, ELEMENT_KEYS) {
            Some(Value::Array(items)) => items.iter().map(|item| parse_element(item, frame)).collect(),
            _ => Vec::new(),
        };

        let main_text_content = first_present(&raw, TEXT_KEYS)
            .and_then(Value::as_str)
            .map(str::to_string);

        let verification_passed = first_present(&raw, VERIFIED_KEYS).and_then(Value::as_bool);

        Self {
            found_elements,
            main_text_content,
            identified_element_bbox,
            verification_passed,
            raw,
        }
    }
}

fn parse_element(item: &Value, frame: Option<(u32, u32)>) -> FoundElement {
    let Some(obj) = item.as_object() else {
        // Bare strings show up from some OCR-style backends
        return FoundElement {
            label: item.as_str().map(str::to_string),
            bbox: None,
            raw: item.clone(),
        };
    };

    let label = LABEL_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::to_string);

    let bbox = first_present(obj, BBOX_KEYS).and_then(|v| match BoundingBox::from_json(v, frame) {
        Ok(b) => Some(b),
        Err(e) => {
            warn!(label = ?label, "Skipping malformed element box: {}", e);
            None
        }
    });

    FoundElement { label, bbox, raw: item.clone() }
}

/// (width, height) of an encoded screenshot, if the `image` crate can read
/// its header.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn picks_up_alias_keys() {
        let analysis = VisionAnalysis::from_raw(
            map(json!({
                "parsed_content_list": [
                    {"content": "File", "bbox": [0, 0, 40, 20]},
                    {"content": "Save", "bbox": [100, 630, 120, 650]}
                ],
                "main_text_content": "File Edit View",
                "verified": true
            })),
            None,
        );
        assert_eq!(analysis.found_elements.len(), 2);
        assert_eq!(analysis.found_elements[1].label.as_deref(), Some("Save"));
        assert_eq!(analysis.main_text_content.as_deref(), Some("File Edit View"));
        assert_eq!(analysis.verification_passed, Some(true));
        assert!(analysis.identified_element_bbox.is_none());
    }

    #[test]
    fn ratio_boxes_scaled_by_frame() {
        let analysis = VisionAnalysis::from_raw(
            map(json!({"bounding_box": [0.1, 0.5, 0.2, 0.75]})),
            Some((1000, 800)),
        );
        let bbox = analysis.identified_element_bbox.unwrap();
        assert_eq!(bbox, BoundingBox::new(100, 400, 200, 600).unwrap());
    }

    #[test]
    fn malformed_element_box_is_dropped() {
        let analysis = VisionAnalysis::from_raw(
            map(json!({"elements": [{"label": "OK", "bbox": [50, 50, 10, 10]}, "Cancel"]})),
            None,
        );
        assert_eq!(analysis.found_elements[0].label.as_deref(), Some("OK"));
        assert!(analysis.found_elements[0].bbox.is_none());
        assert_eq!(analysis.found_elements[1].label.as_deref(), Some("Cancel"));
    }

    #[test]
    fn reads_png_dimensions() {
        let img = image::RgbaImage::new(3, 2);
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        assert_eq!(image_dimensions(&bytes), Some((3, 2)));
        assert_eq!(image_dimensions(b"not an image"), None);
    }
}
