use std::sync::Arc;

use tracing::{debug, info};

use crate::error::AgentResult;
use crate::geometry::{BoundingBox, Point};
use crate::vision::{image_dimensions, VisionAnalysis, VisionService};

#[derive(Debug, Clone, PartialEq)]
pub enum Grounding {
    Found { bbox: BoundingBox, center: Point },
    NotFound,
}

impl Grounding {
    fn found(bbox: BoundingBox) -> Self {
        Grounding::Found { bbox, center: bbox.center() }
    }
}

pub fn grounding_prompt(description: &str) -> String {
    format!("Locate the UI element described as: {}", description)
}

/// Turns a visual description into screen coordinates. Never clicks and never
/// captures; the caller supplies a fresh screenshot.
pub struct GroundingResolver {
    vision: Arc<dyn VisionService>,
}

impl GroundingResolver {
    pub fn new(vision: Arc<dyn VisionService>) -> Self {
        Self { vision }
    }

    pub async fn resolve(&self, description: &str, screenshot: &[u8]) -> AgentResult<Grounding> {
        let raw = self
            .vision
            .analyze_image(screenshot, &grounding_prompt(description))
            .await?;
        let analysis = VisionAnalysis::from_raw(raw, image_dimensions(screenshot));
        let grounding = select_target(&analysis, description);

        match &grounding {
            Grounding::Found { center, .. } => {
                info!(description, x = center.x, y = center.y, "Grounded target")
            }
            Grounding::NotFound => info!(description, "Target not found on screen"),
        }
        Ok(grounding)
    }
}

/// A box the backend explicitly identified wins. Otherwise the first listed
/// element whose label matches on whole words (all of the label's words appear
/// in the description, or the other way round) is taken: first match wins, in
/// the backend's own order, which is not necessarily the most visually
/// prominent match.
pub fn select_target(analysis: &VisionAnalysis, description: &str) -> Grounding {
    if let Some(bbox) = analysis.identified_element_bbox {
        return Grounding::found(bbox);
    }

    let wanted = words(description);
    if wanted.is_empty() {
        return Grounding::NotFound;
    }

    for (rank, element) in analysis.found_elements.iter().enumerate() {
        let (Some(label), Some(bbox)) = (&element.label, element.bbox) else {
            continue;
        };
        let have = words(label);
        if have.is_empty() {
            continue;
        }
        if is_subset(&have, &wanted) || is_subset(&wanted, &have) {
            debug!(rank, label = %label, "Element matched description");
            return Grounding::found(bbox);
        }
    }

    Grounding::NotFound
}

/// Lowercased alphanumeric words; punctuation separates them.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn is_subset(part: &[String], whole: &[String]) -> bool {
    part.iter().all(|w| whole.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::Mutex;

    struct CannedVision {
        reply: Value,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VisionService for CannedVision {
        async fn analyze_image(&self, _image: &[u8], prompt: &str) -> AgentResult<Map<String, Value>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Value::Object(map) => Ok(map.clone()),
                _ => Err(AgentError::Vision("backend down".into())),
            }
        }
    }

    fn resolver(reply: Value) -> (GroundingResolver, Arc<CannedVision>) {
        let vision = Arc::new(CannedVision { reply, prompts: Mutex::new(Vec::new()) });
        (GroundingResolver::new(vision.clone()), vision)
    }

    #[tokio::test]
    async fn identified_box_gives_center() {
        let (resolver, vision) = resolver(json!({"bounding_box": [100, 630, 120, 650]}));
        let grounding = resolver.resolve("Save button", b"png").await.unwrap();
        assert_eq!(
            grounding,
            Grounding::Found {
                bbox: BoundingBox::new(100, 630, 120, 650).unwrap(),
                center: Point::new(110, 640)
            }
        );
        assert_eq!(
            vision.prompts.lock().unwrap().as_slice(),
            ["Locate the UI element described as: Save button"]
        );
    }

    #[tokio::test]
    async fn first_matching_element_wins() {
        let (resolver, _) = resolver(json!({"elements": [
            {"text": "Open", "bbox": [0, 0, 10, 10]},
            {"text": "Save As...", "bbox": [20, 20, 40, 40]},
            {"text": "Save", "bbox": [50, 50, 70, 70]}
        ]}));
        let grounding = resolver.resolve("save", b"png").await.unwrap();
        let Grounding::Found { center, .. } = grounding else { panic!("expected a match") };
        assert_eq!(center, Point::new(30, 30));
    }

    #[tokio::test]
    async fn no_match_is_not_found() {
        let (resolver, _) = resolver(json!({"elements": [{"text": "Cancel", "bbox": [0, 0, 10, 10]}]}));
        assert_eq!(resolver.resolve("Save button", b"png").await.unwrap(), Grounding::NotFound);
    }

    #[tokio::test]
    async fn vision_error_propagates() {
        let (resolver, _) = resolver(Value::Null);
        let err = resolver.resolve("Save", b"png").await.unwrap_err();
        assert!(matches!(err, AgentError::Vision(_)));
    }

    fn analysis(raw: Value) -> VisionAnalysis {
        VisionAnalysis::from_raw(raw.as_object().cloned().unwrap(), None)
    }

    #[test]
    fn label_inside_another_word_does_not_match() {
        let elements = analysis(json!({"elements": [{"content": "OK", "bbox": [0, 0, 10, 10]}]}));
        assert_eq!(select_target(&elements, "Bookmarks menu"), Grounding::NotFound);
    }

    #[test]
    fn whole_words_match_either_way() {
        let elements = analysis(json!({"elements": [
            {"content": "Bookmarks", "bbox": [0, 0, 10, 10]},
            {"content": "OK", "bbox": [20, 20, 30, 30]}
        ]}));
        let Grounding::Found { center, .. } = select_target(&elements, "the OK button") else {
            panic!("expected a match")
        };
        assert_eq!(center, Point::new(25, 25));
        let Grounding::Found { center, .. } = select_target(&elements, "bookmarks") else {
            panic!("expected a match")
        };
        assert_eq!(center, Point::new(5, 5));
    }

    #[test]
    fn element_without_box_is_skipped() {
        let analysis = VisionAnalysis::from_raw(
            json!({"elements": [{"text": "Save"}, {"label": "Save", "bbox": [1, 1, 3, 3]}]})
                .as_object()
                .cloned()
                .unwrap(),
            None,
        );
        let Grounding::Found { center, .. } = select_target(&analysis, "Save") else { panic!("expected a match") };
        assert_eq!(center, Point::new(2, 2));
    }
}
