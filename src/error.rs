use std::fmt;

use thiserror::Error;

use crate::action_schema::Action;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Validation error: {0}")]
    Validation(#[from] PlanValidationError),

    #[error("Vision error: {0}")]
    Vision(String),

    #[error("Desktop control error: {0}")]
    DesktopControl(String),

    #[error("Screen capture error: {0}")]
    ScreenCapture(String),

    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl AgentError {
    /// Errors that say nothing about the plan itself. Retrying the same
    /// command may succeed once the underlying service recovers.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            AgentError::Config(_)
            | AgentError::Planning(_)
            | AgentError::Vision(_)
            | AgentError::Orchestration(_) => true,
            AgentError::Validation(_) | AgentError::DesktopControl(_) | AgentError::ScreenCapture(_) => false,
        }
    }
}

/// A single step failed the action model's contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("field '{field}': {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(field: &str) -> Self {
        Self::new(field, "required field is missing")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepError {
    pub index: usize,
    pub error: ValidationError,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}: {}", self.index, self.error)
    }
}

/// Every invalid step of a raw plan, plus the actions that decoded cleanly
/// before the first failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct PlanValidationError {
    pub errors: Vec<StepError>,
    pub valid_prefix: Vec<Action>,
}

impl PlanValidationError {
    pub fn first_invalid_index(&self) -> Option<usize> {
        self.errors.iter().map(|e| e.index).min()
    }

    pub fn invalid_indices(&self) -> Vec<usize> {
        self.errors.iter().map(|e| e.index).collect()
    }
}

impl fmt::Display for PlanValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plan has {} invalid step(s)", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_split() {
        assert!(AgentError::Vision("down".into()).is_infrastructure());
        assert!(AgentError::Planning("empty".into()).is_infrastructure());
        assert!(!AgentError::DesktopControl("oob".into()).is_infrastructure());
        assert!(!AgentError::ScreenCapture("grab failed".into()).is_infrastructure());
    }

    #[test]
    fn plan_error_lists_every_step() {
        let err = PlanValidationError {
            errors: vec![
                StepError { index: 1, error: ValidationError::missing("text") },
                StepError { index: 3, error: ValidationError::new("action", "unknown action 'JUMP'") },
            ],
            valid_prefix: Vec::new(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("plan has 2 invalid step(s)"));
        assert!(msg.contains("step 1: field 'text'"));
        assert!(msg.contains("step 3: field 'action'"));
        assert_eq!(err.first_invalid_index(), Some(1));
    }
}
