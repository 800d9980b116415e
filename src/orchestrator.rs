use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::action_schema::{Action, ActionKind, PointerTarget};
use crate::desktop::DesktopController;
use crate::error::{AgentError, AgentResult};
use crate::grounding::{Grounding, GroundingResolver};
use crate::plan::{validate_plan, Plan};
use crate::planner::PlanningService;
use crate::vision::{image_dimensions, VisionAnalysis, VisionService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running { step: usize },
    Completed,
    Failed,
    Aborted,
}

/// Why a plan ended in `Failed`.
#[derive(Debug)]
pub enum FailureCause {
    /// The plan itself said the command cannot be done.
    TaskFailed,
    TargetNotFound { description: String },
    /// A click with neither coordinates nor a description.
    UnresolvableTarget { action: &'static str },
    Error(AgentError),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::TaskFailed => write!(f, "task reported failure"),
            FailureCause::TargetNotFound { description } => {
                write!(f, "target '{}' not found on screen", description)
            }
            FailureCause::UnresolvableTarget { action } => {
                write!(f, "{} has neither coordinates nor a description", action)
            }
            FailureCause::Error(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed {
        message: Option<String>,
    },
    /// The plan could not be carried out; a different command is needed.
    /// `failing_step` is a zero-based plan index.
    Failed {
        message: Option<String>,
        failing_step: Option<usize>,
        cause: FailureCause,
    },
    /// Infrastructure trouble unrelated to the plan; the same command may
    /// succeed on retry.
    Aborted {
        cause: AgentError,
    },
}

impl ExecutionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { .. })
    }

    fn failed(step: usize, cause: FailureCause) -> Self {
        ExecutionOutcome::Failed { message: None, failing_step: Some(step), cause }
    }

    fn terminal_state(&self) -> EngineState {
        match self {
            ExecutionOutcome::Completed { .. } => EngineState::Completed,
            ExecutionOutcome::Failed { .. } => EngineState::Failed,
            ExecutionOutcome::Aborted { .. } => EngineState::Aborted,
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Completed { message: Some(m) } => write!(f, "Completed: {}", m),
            ExecutionOutcome::Completed { message: None } => write!(f, "Completed"),
            ExecutionOutcome::Failed { message, failing_step, cause } => {
                write!(f, "Failed")?;
                if let Some(step) = failing_step {
                    write!(f, " at step {}", step)?;
                }
                match message {
                    Some(m) => write!(f, ": {}", m),
                    None => write!(f, ": {}", cause),
                }
            }
            ExecutionOutcome::Aborted { cause } => write!(f, "Aborted: {}", cause),
        }
    }
}

#[derive(Debug)]
pub struct ExecutionReport {
    pub command_id: Uuid,
    pub outcome: ExecutionOutcome,
    pub steps_executed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Raw result of the last screen analysis the plan asked for.
    pub last_analysis: Option<Map<String, Value>>,
}

/// Stops a running command before its next step. Cloneable so a signal
/// handler can hold one.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Clears the busy flag however the run ends.
struct RunGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

enum StepFlow {
    Continue,
    Complete(Option<String>),
    Fail(Option<String>, FailureCause),
}

#[derive(Default)]
struct Observation {
    last_screenshot: Option<Vec<u8>>,
    last_analysis: Option<Map<String, Value>>,
}

struct RunResult {
    outcome: ExecutionOutcome,
    steps_executed: usize,
    observation: Observation,
}

impl RunResult {
    fn before_execution(outcome: ExecutionOutcome) -> Self {
        Self { outcome, steps_executed: 0, observation: Observation::default() }
    }
}

/// Plans one command, validates the whole plan, then runs it step by step
/// against the desktop. One command at a time.
pub struct Orchestrator {
    planner: Arc<dyn PlanningService>,
    vision: Arc<dyn VisionService>,
    desktop: Arc<dyn DesktopController>,
    grounding: GroundingResolver,
    state: Mutex<EngineState>,
    busy: AtomicBool,
    interrupt: InterruptHandle,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn PlanningService>,
        vision: Arc<dyn VisionService>,
        desktop: Arc<dyn DesktopController>,
    ) -> Self {
        Self {
            planner,
            grounding: GroundingResolver::new(vision.clone()),
            vision,
            desktop,
            state: Mutex::new(EngineState::Idle),
            busy: AtomicBool::new(false),
            interrupt: InterruptHandle::default(),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!("Engine state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.interrupt.clear();
        self.set_state(EngineState::Idle);
        Some(RunGuard { busy: &self.busy })
    }

    fn busy_report(started_at: DateTime<Utc>) -> ExecutionReport {
        warn!("Command rejected: another command is still executing");
        ExecutionReport {
            command_id: Uuid::new_v4(),
            outcome: ExecutionOutcome::Aborted {
                cause: AgentError::Orchestration("engine busy".to_string()),
            },
            steps_executed: 0,
            started_at,
            finished_at: Utc::now(),
            last_analysis: None,
        }
    }

    /// Plan, validate and execute one natural-language command.
    pub async fn run(&self, command: &str) -> ExecutionReport {
        let started_at = Utc::now();
        let Some(_guard) = self.try_begin() else {
            return Self::busy_report(started_at);
        };
        let command_id = Uuid::new_v4();
        info!(%command_id, "Command: {}", command);

        let result = match self.plan_command(command).await {
            Ok(plan) => self.drive(&plan).await,
            Err(outcome) => RunResult::before_execution(outcome),
        };
        self.finish(command_id, started_at, result)
    }

    /// Execute an already validated plan.
    pub async fn execute_plan(&self, plan: &Plan) -> ExecutionReport {
        let started_at = Utc::now();
        let Some(_guard) = self.try_begin() else {
            return Self::busy_report(started_at);
        };
        let command_id = Uuid::new_v4();
        info!(%command_id, steps = plan.len(), "Executing supplied plan");

        let result = self.drive(plan).await;
        self.finish(command_id, started_at, result)
    }

    async fn planning_context(&self) -> String {
        let mut context = format!("Operating system: {}", std::env::consts::OS);
        match self.desktop.get_screen_size().await {
            Ok((w, h)) => context.push_str(&format!("\nScreen size: {}x{} pixels", w, h)),
            Err(e) => warn!("Screen size unavailable for planning context: {}", e),
        }
        context
    }

    async fn plan_command(&self, command: &str) -> Result<Plan, ExecutionOutcome> {
        let context = self.planning_context().await;
        let raw = self
            .planner
            .generate_plan(command, &context)
            .await
            .map_err(|cause| ExecutionOutcome::Aborted { cause })?;

        let plan = validate_plan(&raw).map_err(|e| {
            for step in &e.errors {
                warn!("Invalid {}", step);
            }
            ExecutionOutcome::Failed {
                message: None,
                failing_step: e.first_invalid_index(),
                cause: FailureCause::Error(AgentError::Validation(e)),
            }
        })?;

        if let Some(index) = plan.premature_terminal() {
            warn!(
                "Plan has a terminal action at step {} of {}; later steps will not run",
                index,
                plan.len()
            );
        }
        info!(steps = plan.len(), "Plan validated");
        Ok(plan)
    }

    async fn drive(&self, plan: &Plan) -> RunResult {
        let mut observation = Observation::default();
        let mut steps_executed = 0;
        let total = plan.len();

        for (index, action) in plan.steps().iter().enumerate() {
            if self.interrupt.is_interrupted() {
                warn!(step = index, "Interrupted before step");
                return RunResult {
                    outcome: ExecutionOutcome::Aborted {
                        cause: AgentError::Orchestration("interrupted".to_string()),
                    },
                    steps_executed,
                    observation,
                };
            }

            self.set_state(EngineState::Running { step: index });
            info!("Step {}/{}: {}", index + 1, total, action);
            if let Some(reason) = &action.reason {
                debug!("Reason: {}", reason);
            }

            let flow = match self.dispatch(action, &mut observation).await {
                Ok(flow) => flow,
                Err(e) if e.is_infrastructure() => {
                    return RunResult { outcome: ExecutionOutcome::Aborted { cause: e }, steps_executed, observation };
                }
                Err(e) => {
                    return RunResult {
                        outcome: ExecutionOutcome::failed(index, FailureCause::Error(e)),
                        steps_executed,
                        observation,
                    };
                }
            };

            match flow {
                StepFlow::Continue => steps_executed += 1,
                StepFlow::Complete(message) => {
                    steps_executed += 1;
                    let ignored = total - index - 1;
                    if ignored > 0 {
                        warn!("TASK_COMPLETE at step {}; ignoring {} remaining step(s)", index, ignored);
                    }
                    return RunResult { outcome: ExecutionOutcome::Completed { message }, steps_executed, observation };
                }
                StepFlow::Fail(message, cause) => {
                    let outcome = ExecutionOutcome::Failed { message, failing_step: Some(index), cause };
                    return RunResult { outcome, steps_executed, observation };
                }
            }
        }

        if total > 0 {
            debug!("Plan exhausted without a terminal action; treating as completed");
        }
        RunResult { outcome: ExecutionOutcome::Completed { message: None }, steps_executed, observation }
    }

    async fn dispatch(&self, action: &Action, observation: &mut Observation) -> AgentResult<StepFlow> {
        match &action.kind {
            ActionKind::Click(target) | ActionKind::DoubleClick(target) => {
                let (x, y) = match self.resolve_pointer(action.name(), target).await? {
                    Ok(point) => point,
                    Err(cause) => return Ok(StepFlow::Fail(None, cause)),
                };
                if matches!(action.kind, ActionKind::Click(_)) {
                    self.desktop.click(x, y).await?;
                } else {
                    self.desktop.double_click(x, y).await?;
                }
            }
            ActionKind::TypeText { text, interval } => self.desktop.type_text(text, *interval).await?,
            ActionKind::PressKey { key_name } => self.desktop.press_key(key_name).await?,
            ActionKind::MoveMouse { x, y, duration } => self.desktop.move_mouse(*x, *y, *duration).await?,
            ActionKind::Scroll { direction, amount } => self.desktop.scroll(*direction, *amount).await?,
            ActionKind::OpenApplication { application_name } => {
                self.desktop.open_application(application_name).await?
            }
            ActionKind::NavigateUrl { url } => self.desktop.navigate_url(url).await?,
            ActionKind::TakeScreenshot => {
                let shot = self.desktop.take_screenshot().await?;
                debug!(bytes = shot.len(), "Screenshot captured");
                observation.last_screenshot = Some(shot);
            }
            ActionKind::AnalyzeScreenshot { prompt } => {
                let shot = self.desktop.take_screenshot().await?;
                let raw = self.vision.analyze_image(&shot, prompt).await?;
                let analysis = VisionAnalysis::from_raw(raw.clone(), image_dimensions(&shot));
                debug!(
                    elements = analysis.found_elements.len(),
                    verified = ?analysis.verification_passed,
                    "Screen analysed"
                );
                if let Some(text) = &analysis.main_text_content {
                    info!("Screen text: {}", text);
                }
                observation.last_screenshot = Some(shot);
                observation.last_analysis = Some(raw);
            }
            ActionKind::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
            }
            ActionKind::FindApp { app_name } => {
                info!("Planner is looking for '{}' (no desktop effect)", app_name);
            }
            ActionKind::TaskComplete { message } => return Ok(StepFlow::Complete(message.clone())),
            ActionKind::TaskFailed { message } => {
                return Ok(StepFlow::Fail(message.clone(), FailureCause::TaskFailed))
            }
        }
        Ok(StepFlow::Continue)
    }

    /// Explicit coordinates win; otherwise ground the description against a
    /// screenshot taken now.
    async fn resolve_pointer(
        &self,
        action: &'static str,
        target: &PointerTarget,
    ) -> AgentResult<Result<(i32, i32), FailureCause>> {
        if let Some(point) = target.coordinates() {
            return Ok(Ok(point));
        }
        let Some(description) = target.description.as_deref() else {
            return Ok(Err(FailureCause::UnresolvableTarget { action }));
        };

        let shot = self.desktop.take_screenshot().await?;
        match self.grounding.resolve(description, &shot).await? {
            Grounding::Found { center, .. } => Ok(Ok((center.x, center.y))),
            Grounding::NotFound => Ok(Err(FailureCause::TargetNotFound {
                description: description.to_string(),
            })),
        }
    }

    fn finish(&self, command_id: Uuid, started_at: DateTime<Utc>, result: RunResult) -> ExecutionReport {
        let RunResult { outcome, steps_executed, observation } = result;
        self.set_state(outcome.terminal_state());

        match &outcome {
            ExecutionOutcome::Completed { .. } => info!(%command_id, steps_executed, "{}", outcome),
            ExecutionOutcome::Failed { .. } => warn!(%command_id, steps_executed, "{}", outcome),
            ExecutionOutcome::Aborted { .. } => error!(%command_id, steps_executed, "{}", outcome),
        }
        if let Some(shot) = &observation.last_screenshot {
            debug!(bytes = shot.len(), "Last screenshot of the command");
        }

        ExecutionReport {
            command_id,
            outcome,
            steps_executed,
            started_at,
            finished_at: Utc::now(),
            last_analysis: observation.last_analysis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_schema::ScrollDirection;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingDesktop {
        calls: Mutex<Vec<String>>,
        fail_keys: bool,
        fail_capture: bool,
    }

    impl RecordingDesktop {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DesktopController for RecordingDesktop {
        async fn click(&self, x: i32, y: i32) -> AgentResult<()> {
            self.record(format!("click {} {}", x, y));
            Ok(())
        }
        async fn double_click(&self, x: i32, y: i32) -> AgentResult<()> {
            self.record(format!("double_click {} {}", x, y));
            Ok(())
        }
        async fn type_text(&self, text: &str, _interval: f64) -> AgentResult<()> {
            self.record(format!("type {}", text));
            Ok(())
        }
        async fn press_key(&self, key_name: &str) -> AgentResult<()> {
            if self.fail_keys {
                return Err(AgentError::DesktopControl(format!("invalid key name: '{}'", key_name)));
            }
            self.record(format!("key {}", key_name));
            Ok(())
        }
        async fn move_mouse(&self, x: i32, y: i32, _duration: f64) -> AgentResult<()> {
            self.record(format!("move {} {}", x, y));
            Ok(())
        }
        async fn scroll(&self, direction: ScrollDirection, amount: u32) -> AgentResult<()> {
            self.record(format!("scroll {} {}", direction.as_str(), amount));
            Ok(())
        }
        async fn open_application(&self, name: &str) -> AgentResult<()> {
            self.record(format!("open {}", name));
            Ok(())
        }
        async fn navigate_url(&self, url: &str) -> AgentResult<()> {
            self.record(format!("url {}", url));
            Ok(())
        }
        async fn take_screenshot(&self) -> AgentResult<Vec<u8>> {
            if self.fail_capture {
                return Err(AgentError::ScreenCapture("grab failed".to_string()));
            }
            self.record("screenshot".to_string());
            Ok(b"fake-png".to_vec())
        }
        async fn get_screen_size(&self) -> AgentResult<(u32, u32)> {
            Ok((1920, 1080))
        }
    }

    struct StaticVision(Value);

    #[async_trait]
    impl VisionService for StaticVision {
        async fn analyze_image(&self, _image: &[u8], _prompt: &str) -> AgentResult<Map<String, Value>> {
            self.0
                .as_object()
                .cloned()
                .ok_or_else(|| AgentError::Vision("prediction failed".to_string()))
        }
    }

    struct StaticPlanner(AgentResult<Vec<Value>>);

    #[async_trait]
    impl PlanningService for StaticPlanner {
        async fn generate_plan(&self, _command: &str, _context: &str) -> AgentResult<Vec<Value>> {
            match &self.0 {
                Ok(steps) => Ok(steps.clone()),
                Err(e) => Err(AgentError::Planning(e.to_string())),
            }
        }
    }

    fn engine(steps: Vec<Value>, vision: Value) -> (Orchestrator, Arc<RecordingDesktop>) {
        let desktop = Arc::new(RecordingDesktop::default());
        let orchestrator = Orchestrator::new(
            Arc::new(StaticPlanner(Ok(steps))),
            Arc::new(StaticVision(vision)),
            desktop.clone(),
        );
        (orchestrator, desktop)
    }

    #[tokio::test]
    async fn grounded_click_then_complete() {
        let (engine, desktop) = engine(
            vec![
                json!({"action": "CLICK", "description": "Save button"}),
                json!({"action": "TASK_COMPLETE", "message": "saved"}),
            ],
            json!({"bounding_box": [100, 630, 120, 650]}),
        );
        let report = engine.run("save the file").await;
        assert!(matches!(report.outcome, ExecutionOutcome::Completed { message: Some(ref m) } if m == "saved"));
        assert_eq!(desktop.calls(), ["screenshot", "click 110 640"]);
        assert_eq!(report.steps_executed, 2);
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[tokio::test]
    async fn explicit_coordinates_skip_grounding() {
        let (engine, desktop) = engine(vec![json!({"action": "DOUBLE_CLICK", "x": 5, "y": 6})], json!({}));
        let report = engine.run("open it").await;
        assert!(report.outcome.is_completed());
        assert_eq!(desktop.calls(), ["double_click 5 6"]);
    }

    #[tokio::test]
    async fn grounding_miss_fails_without_clicking() {
        let (engine, desktop) = engine(
            vec![json!({"action": "CLICK", "description": "Save button"}), json!({"action": "TASK_COMPLETE"})],
            json!({"elements": [{"text": "Cancel", "bbox": [0, 0, 10, 10]}]}),
        );
        let report = engine.run("save").await;
        match report.outcome {
            ExecutionOutcome::Failed { failing_step, cause: FailureCause::TargetNotFound { description }, .. } => {
                assert_eq!(failing_step, Some(0));
                assert_eq!(description, "Save button");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(desktop.calls(), ["screenshot"]);
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[tokio::test]
    async fn click_without_target_fails_at_dispatch() {
        let (engine, desktop) = engine(
            vec![json!({"action": "WAIT", "duration_ms": 0}), json!({"action": "CLICK"})],
            json!({}),
        );
        let report = engine.run("click").await;
        assert!(matches!(
            report.outcome,
            ExecutionOutcome::Failed { failing_step: Some(1), cause: FailureCause::UnresolvableTarget { action: "CLICK" }, .. }
        ));
        assert!(desktop.calls().is_empty());
        assert_eq!(report.steps_executed, 1);
    }

    #[tokio::test]
    async fn task_failed_has_no_side_effects() {
        let (engine, desktop) = engine(
            vec![json!({"action": "TASK_FAILED", "message": "cannot find app"})],
            json!({}),
        );
        let report = engine.run("open the moon").await;
        match &report.outcome {
            ExecutionOutcome::Failed { message, cause: FailureCause::TaskFailed, .. } => {
                assert_eq!(message.as_deref(), Some("cannot find app"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(report.outcome.to_string(), "Failed at step 0: cannot find app");
        assert!(desktop.calls().is_empty());
    }

    #[tokio::test]
    async fn early_complete_ignores_rest() {
        let (engine, desktop) = engine(
            vec![
                json!({"action": "PRESS_KEY", "key_name": "enter"}),
                json!({"action": "TASK_COMPLETE"}),
                json!({"action": "TYPE_TEXT", "text": "never"}),
            ],
            json!({}),
        );
        let report = engine.run("press enter").await;
        assert!(report.outcome.is_completed());
        assert_eq!(desktop.calls(), ["key enter"]);
        assert_eq!(report.steps_executed, 2);
    }

    #[tokio::test]
    async fn invalid_plan_runs_nothing() {
        let (engine, desktop) = engine(
            vec![
                json!({"action": "TYPE_TEXT", "text": "hi"}),
                json!({"action": "SCROLL", "direction": "sideways"}),
                json!({"nope": true}),
            ],
            json!({}),
        );
        let report = engine.run("scroll").await;
        match report.outcome {
            ExecutionOutcome::Failed { failing_step, cause: FailureCause::Error(AgentError::Validation(e)), .. } => {
                assert_eq!(failing_step, Some(1));
                assert_eq!(e.invalid_indices(), vec![1, 2]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(desktop.calls().is_empty());
    }

    #[tokio::test]
    async fn planner_error_aborts() {
        let desktop = Arc::new(RecordingDesktop::default());
        let engine = Orchestrator::new(
            Arc::new(StaticPlanner(Err(AgentError::Planning("empty response".into())))),
            Arc::new(StaticVision(json!({}))),
            desktop.clone(),
        );
        let report = engine.run("anything").await;
        assert!(matches!(report.outcome, ExecutionOutcome::Aborted { cause: AgentError::Planning(_) }));
        assert_eq!(engine.state(), EngineState::Aborted);
        assert!(desktop.calls().is_empty());
    }

    #[tokio::test]
    async fn vision_failure_aborts() {
        let (engine, _) = engine(
            vec![json!({"action": "ANALYZE_SCREENSHOT", "prompt": "what is open?"})],
            Value::Null,
        );
        let report = engine.run("look").await;
        assert!(matches!(report.outcome, ExecutionOutcome::Aborted { cause: AgentError::Vision(_) }));
    }

    #[tokio::test]
    async fn desktop_error_fails_step_without_retry() {
        let desktop = Arc::new(RecordingDesktop { fail_keys: true, ..Default::default() });
        let engine = Orchestrator::new(
            Arc::new(StaticPlanner(Ok(vec![
                json!({"action": "OPEN_APPLICATION", "application_name": "Notes"}),
                json!({"action": "PRESS_KEY", "key_name": "hyperjump"}),
                json!({"action": "TASK_COMPLETE"}),
            ]))),
            Arc::new(StaticVision(json!({}))),
            desktop.clone(),
        );
        let report = engine.run("notes").await;
        assert!(matches!(
            report.outcome,
            ExecutionOutcome::Failed { failing_step: Some(1), cause: FailureCause::Error(AgentError::DesktopControl(_)), .. }
        ));
        assert_eq!(desktop.calls(), ["open Notes"]);
    }

    #[tokio::test]
    async fn analysis_kept_as_observation() {
        let (engine, _) = engine(
            vec![json!({"action": "ANALYZE_SCREENSHOT", "prompt": "read it"}), json!({"action": "TASK_COMPLETE"})],
            json!({"text": "Hello"}),
        );
        let report = engine.run("read").await;
        assert_eq!(report.last_analysis.unwrap()["text"], "Hello");
    }

    fn capture_failing_engine(steps: Vec<Value>) -> (Orchestrator, Arc<RecordingDesktop>) {
        let desktop = Arc::new(RecordingDesktop { fail_capture: true, ..Default::default() });
        let engine = Orchestrator::new(
            Arc::new(StaticPlanner(Ok(steps))),
            Arc::new(StaticVision(json!({}))),
            desktop.clone(),
        );
        (engine, desktop)
    }

    #[tokio::test]
    async fn capture_error_fails_the_screenshot_step() {
        let (engine, _) = capture_failing_engine(vec![
            json!({"action": "PRESS_KEY", "key_name": "tab"}),
            json!({"action": "TAKE_SCREENSHOT"}),
            json!({"action": "TASK_COMPLETE"}),
        ]);
        let report = engine.run("grab the screen").await;
        assert!(matches!(
            report.outcome,
            ExecutionOutcome::Failed { failing_step: Some(1), cause: FailureCause::Error(AgentError::ScreenCapture(_)), .. }
        ));
        assert_eq!(report.steps_executed, 1);
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[tokio::test]
    async fn capture_error_while_grounding_fails_the_click() {
        let (engine, desktop) = capture_failing_engine(vec![
            json!({"action": "CLICK", "description": "Save button"}),
            json!({"action": "TASK_COMPLETE"}),
        ]);
        let report = engine.run("save").await;
        assert!(matches!(
            report.outcome,
            ExecutionOutcome::Failed { failing_step: Some(0), cause: FailureCause::Error(AgentError::ScreenCapture(_)), .. }
        ));
        assert!(desktop.calls().is_empty());
    }

    #[tokio::test]
    async fn stale_interrupt_cleared_on_start() {
        let (engine, desktop) = engine(vec![json!({"action": "TYPE_TEXT", "text": "x"})], json!({}));
        let plan = validate_plan(&[json!({"action": "TYPE_TEXT", "text": "x"})]).unwrap();

        engine.interrupt_handle().interrupt();
        let report = engine.execute_plan(&plan).await;
        assert!(report.outcome.is_completed());
        assert_eq!(desktop.calls(), ["type x"]);
    }

    #[tokio::test]
    async fn busy_engine_rejects_second_command() {
        let (engine, desktop) = engine(vec![json!({"action": "TASK_COMPLETE"})], json!({}));
        let _held = engine.try_begin().unwrap();
        let report = engine.run("again").await;
        assert!(matches!(
            report.outcome,
            ExecutionOutcome::Aborted { cause: AgentError::Orchestration(ref m) } if m == "engine busy"
        ));
        assert!(desktop.calls().is_empty());
    }

    #[test]
    fn outcome_display() {
        assert_eq!(ExecutionOutcome::Completed { message: None }.to_string(), "Completed");
        let failed = ExecutionOutcome::failed(3, FailureCause::TargetNotFound { description: "OK".into() });
        assert_eq!(failed.to_string(), "Failed at step 3: target 'OK' not found on screen");
        let aborted = ExecutionOutcome::Aborted { cause: AgentError::Vision("timeout".into()) };
        assert_eq!(aborted.to_string(), "Aborted: Vision error: timeout");
    }
}
