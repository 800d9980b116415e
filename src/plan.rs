use serde_json::Value;

use crate::action_schema::{decode_action, Action};
use crate::error::{PlanValidationError, StepError};

/// Ordered actions derived from one user command. Insertion order is
/// execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    steps: Vec<Action>,
}

impl Plan {
    pub fn new(steps: Vec<Action>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Action] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the first terminal action that is not the last step, if any.
    pub fn premature_terminal(&self) -> Option<usize> {
        let last = self.steps.len().checked_sub(1)?;
        self.steps
            .iter()
            .position(|a| a.is_terminal())
            .filter(|&i| i < last)
    }

    pub fn to_raw(&self) -> Vec<Value> {
        self.steps.iter().map(Action::to_raw).collect()
    }
}

/// Validate the whole raw plan before anything runs. Every invalid step is
/// reported, not just the first one.
pub fn validate_plan(raw_steps: &[Value]) -> Result<Plan, PlanValidationError> {
    let mut steps = Vec::with_capacity(raw_steps.len());
    let mut errors = Vec::new();

    for (index, raw) in raw_steps.iter().enumerate() {
        match decode_action(raw) {
            Ok(action) => steps.push(action),
            Err(error) => errors.push(StepError { index, error }),
        }
    }

    if errors.is_empty() {
        return Ok(Plan::new(steps));
    }

    let first_bad = errors[0].index;
    steps.truncate(first_bad);
    Err(PlanValidationError { errors, valid_prefix: steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_schema::ActionKind;
    use serde_json::json;

    #[test]
    fn valid_plan_keeps_order() {
        let plan = validate_plan(&[
            json!({"action": "OPEN_APPLICATION", "application_name": "Notes"}),
            json!({"action": "TYPE_TEXT", "text": "hello"}),
            json!({"action": "TASK_COMPLETE"}),
        ])
        .unwrap();
        let names: Vec<_> = plan.steps().iter().map(|a| a.name()).collect();
        assert_eq!(names, ["OPEN_APPLICATION", "TYPE_TEXT", "TASK_COMPLETE"]);
        assert!(plan.premature_terminal().is_none());
    }

    #[test]
    fn reports_every_invalid_step() {
        let err = validate_plan(&[
            json!({"action": "WAIT", "duration_ms": 10}),
            json!({"text": "no discriminant"}),
            json!({"action": "PRESS_KEY", "key_name": "enter"}),
            json!("not an object"),
            json!({"action": "SCROLL", "direction": "diagonal"}),
        ])
        .unwrap_err();
        assert_eq!(err.invalid_indices(), vec![1, 3, 4]);
        assert_eq!(err.valid_prefix.len(), 1);
        assert_eq!(err.valid_prefix[0].kind, ActionKind::Wait { duration_ms: 10 });
    }

    #[test]
    fn missing_discriminant_rejects_whole_plan() {
        let err = validate_plan(&[json!({"action": "TAKE_SCREENSHOT"}), json!({"prompt": "x"})]).unwrap_err();
        assert_eq!(err.first_invalid_index(), Some(1));
        assert_eq!(err.errors[0].error.field, "action");
    }

    #[test]
    fn revalidating_raw_form_is_identical() {
        let plan = validate_plan(&[
            json!({"action": "CLICK", "description": "Save button"}),
            json!({"action": "NAVIGATE_URL", "url": "https://example.com"}),
            json!({"action": "MOVE_MOUSE", "x": 3, "y": 4, "duration": 1.25}),
            json!({"action": "TASK_COMPLETE", "message": "done"}),
        ])
        .unwrap();
        let again = validate_plan(&plan.to_raw()).unwrap();
        assert_eq!(plan, again);
    }

    #[test]
    fn premature_terminal_detected() {
        let plan = validate_plan(&[
            json!({"action": "TASK_COMPLETE"}),
            json!({"action": "WAIT"}),
        ])
        .unwrap();
        assert_eq!(plan.premature_terminal(), Some(0));
    }
}
