//! Scenario runner: executes steps against a session and fixture, and
//! fans scenarios out across isolated lanes

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::driver::ElementRef;
use crate::error::{FailureKind, HarnessError, HarnessResult};
use crate::fixture::{ApplicationFixture, Endpoint, FixtureConfig};
use crate::scenario::{Scenario, Step};
use crate::session::{BrowserConfig, BrowserSession};
use crate::wait::WaitCondition;

/// Lifecycle of one scenario run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running(usize),
    Passed,
    /// `step` is `None` when setup failed before any step ran
    Failed { step: Option<usize>, reason: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Passed | RunState::Failed { .. })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running(step) => write!(f, "running step {}", step),
            RunState::Passed => write!(f, "passed"),
            RunState::Failed { step: Some(step), .. } => write!(f, "failed at step {}", step),
            RunState::Failed { step: None, .. } => write!(f, "failed during setup"),
        }
    }
}

/// One executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Outcome of a single scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub passed: bool,
    pub failed_step: Option<usize>,
    pub failure_kind: Option<FailureKind>,
    pub diagnostic: Option<String>,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    pub screenshot: Option<PathBuf>,
}

impl ScenarioResult {
    fn new(scenario: &Scenario) -> Self {
        Self {
            scenario_name: scenario.name.clone(),
            passed: false,
            failed_step: None,
            failure_kind: None,
            diagnostic: None,
            duration_ms: 0,
            steps: Vec::new(),
            screenshot: None,
        }
    }

    fn setup_failure(scenario: &Scenario, kind: FailureKind, error: &HarnessError, start: Instant) -> Self {
        let mut result = Self::new(scenario);
        result.failure_kind = Some(kind);
        result.diagnostic = Some(error.to_string());
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Final state of the run
    pub fn state(&self) -> RunState {
        if self.passed {
            RunState::Passed
        } else {
            RunState::Failed {
                step: self.failed_step,
                reason: self.diagnostic.clone().unwrap_or_default(),
            }
        }
    }
}

/// Outcome of a whole suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Write `test-results.json` into `output_dir`
    pub fn write_results(&self, output_dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Source of fresh browser sessions, one per lane
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> HarnessResult<BrowserSession>;
}

#[async_trait]
impl SessionFactory for BrowserConfig {
    async fn open(&self) -> HarnessResult<BrowserSession> {
        BrowserSession::open(self).await
    }
}

/// Executes scenarios step by step
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    /// Where failure screenshots go (None = no screenshots)
    artifacts_dir: Option<PathBuf>,
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    /// Run `scenario` against a live session and fixture. Failures are
    /// reported in the result, never returned.
    pub async fn run(
        &self,
        scenario: &Scenario,
        session: &BrowserSession,
        fixture: &ApplicationFixture,
    ) -> ScenarioResult {
        self.run_against(scenario, session, fixture.endpoint()).await
    }

    pub(crate) async fn run_against(
        &self,
        scenario: &Scenario,
        session: &BrowserSession,
        endpoint: &Endpoint,
    ) -> ScenarioResult {
        let start = Instant::now();
        let mut result = ScenarioResult::new(scenario);
        let mut state = RunState::Pending;
        debug!("{}: {}", scenario.name, state);

        // A statically broken scenario fails before touching the browser
        if let Err(e) = scenario.validate() {
            let step = match &e {
                HarnessError::UnboundElement { step, .. } => Some(*step),
                _ => None,
            };
            error!("✗ {} - invalid scenario: {}", scenario.name, e);
            result.failed_step = step;
            result.failure_kind = Some(FailureKind::InvalidScenario);
            result.diagnostic = Some(e.to_string());
            result.duration_ms = start.elapsed().as_millis() as u64;
            return result;
        }

        let mut bindings: HashMap<String, ElementRef> = HashMap::new();

        for (index, step) in scenario.steps.iter().enumerate() {
            state = RunState::Running(index);
            debug!("{}: {} ({})", scenario.name, state, step.name());

            let step_start = Instant::now();
            let outcome = self.execute(index, step, session, endpoint, &mut bindings).await;
            result.steps.push(StepRecord {
                index,
                name: step.name(),
                duration_ms: step_start.elapsed().as_millis() as u64,
                error: outcome.as_ref().err().map(|e| e.to_string()),
            });

            if let Err(e) = outcome {
                let reason = format!("step {} ({}): {}", index, step.name(), e);
                state = RunState::Failed {
                    step: Some(index),
                    reason: reason.clone(),
                };
                error!("✗ {} - {}", scenario.name, reason);

                result.failed_step = Some(index);
                result.failure_kind = Some(e.kind());
                result.diagnostic = Some(reason);
                result.screenshot = self.capture_failure(scenario, index, session).await;
                break;
            }
        }

        if !state.is_terminal() {
            state = RunState::Passed;
            result.passed = true;
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        if result.passed {
            info!("✓ {} ({} ms)", scenario.name, result.duration_ms);
        }
        debug!("{}: {}", scenario.name, state);
        result
    }

    async fn execute(
        &self,
        index: usize,
        step: &Step,
        session: &BrowserSession,
        endpoint: &Endpoint,
        bindings: &mut HashMap<String, ElementRef>,
    ) -> HarnessResult<()> {
        match step {
            Step::Navigate { path } => {
                let url = endpoint.join(path)?;
                session.navigate(&url).await?;
                // Elements of the previous page are gone
                bindings.clear();
            }
            Step::WaitFor {
                bind,
                selector,
                predicate,
                timeout_ms,
            } => {
                let mut condition = WaitCondition::new(selector.clone(), predicate.clone());
                if let Some(ms) = timeout_ms {
                    condition = condition.with_timeout(std::time::Duration::from_millis(*ms));
                }
                let element = session.await_condition(&condition).await?;
                bindings.insert(bind.clone(), element);
            }
            Step::Find { bind, selector } => {
                let element = session.find(selector).await?;
                bindings.insert(bind.clone(), element);
            }
            Step::TypeInto { element, text } => {
                let element = bound(bindings, index, element)?;
                session.type_text(element, text).await?;
            }
            Step::Clear { element } => {
                let element = bound(bindings, index, element)?;
                session.clear(element).await?;
            }
            Step::Click { element } => {
                let element = bound(bindings, index, element)?;
                session.click(element).await?;
            }
            Step::AssertContains { element, expected } => {
                let element = bound(bindings, index, element)?;
                let actual = session.text(element).await?;
                let missing: Vec<&str> = expected
                    .iter()
                    .map(String::as_str)
                    .filter(|needle| !actual.contains(needle))
                    .collect();
                if !missing.is_empty() {
                    return Err(HarnessError::AssertionMismatch {
                        selector: element.selector().to_string(),
                        expected: format!("text containing {:?}", missing),
                        actual,
                    });
                }
            }
            Step::AssertTextEquals { element, expected } => {
                let element = bound(bindings, index, element)?;
                let actual = session.text(element).await?;
                if actual.trim() != expected.trim() {
                    return Err(HarnessError::AssertionMismatch {
                        selector: element.selector().to_string(),
                        expected: format!("{:?}", expected),
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    async fn capture_failure(
        &self,
        scenario: &Scenario,
        index: usize,
        session: &BrowserSession,
    ) -> Option<PathBuf> {
        let dir = self.artifacts_dir.as_ref()?;
        let path = dir.join(format!("{}-step{}.png", file_stem(&scenario.name), index));

        match write_screenshot(session, dir, &path).await {
            Ok(()) => {
                info!("Failure screenshot: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to capture screenshot for {}: {}", scenario.name, e);
                None
            }
        }
    }

    /// Run one scenario in its own lane: fresh fixture, fresh session,
    /// both torn down on every path
    pub async fn run_isolated(
        &self,
        scenario: &Scenario,
        fixture_config: &FixtureConfig,
        sessions: &dyn SessionFactory,
    ) -> ScenarioResult {
        let start = Instant::now();

        let mut fixture = match ApplicationFixture::start(fixture_config.clone()).await {
            Ok(fixture) => fixture,
            Err(e) => {
                error!("✗ {} - {}", scenario.name, e);
                return ScenarioResult::setup_failure(scenario, FailureKind::FixtureStart, &e, start);
            }
        };

        let session = match sessions.open().await {
            Ok(session) => session,
            Err(e) => {
                error!("✗ {} - {}", scenario.name, e);
                stop_fixture(&mut fixture).await;
                return ScenarioResult::setup_failure(scenario, FailureKind::SessionStart, &e, start);
            }
        };

        let mut result = self.run(scenario, &session, &fixture).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close browser session: {}", e);
        }
        stop_fixture(&mut fixture).await;

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }
}

async fn write_screenshot(session: &BrowserSession, dir: &Path, path: &Path) -> HarnessResult<()> {
    let png = session.screenshot().await?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, png).await?;
    Ok(())
}

async fn stop_fixture(fixture: &mut ApplicationFixture) {
    if let Err(e) = fixture.stop().await {
        warn!("Failed to stop application fixture: {}", e);
    }
}

fn bound<'a>(
    bindings: &'a HashMap<String, ElementRef>,
    step: usize,
    name: &str,
) -> HarnessResult<&'a ElementRef> {
    bindings.get(name).ok_or_else(|| HarnessError::UnboundElement {
        step,
        name: name.to_string(),
    })
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Runs a list of scenarios, each in its own lane
pub struct SuiteRunner {
    runner: ScenarioRunner,
    fixture: FixtureConfig,
    sessions: Box<dyn SessionFactory>,
    lanes: usize,
}

impl SuiteRunner {
    pub fn new(runner: ScenarioRunner, fixture: FixtureConfig, sessions: Box<dyn SessionFactory>) -> Self {
        Self {
            runner,
            fixture,
            sessions,
            lanes: 1,
        }
    }

    /// Number of scenarios in flight at once
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }

    /// Run every scenario; results come back in input order
    pub async fn run_all(&self, scenarios: &[Scenario]) -> SuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();

        if self.lanes > 1 && self.fixture.port.is_some() {
            warn!("Fixed application port with {} lanes; lanes will collide", self.lanes);
        }
        info!("Running {} scenario(s) on {} lane(s)...", scenarios.len(), self.lanes);

        let results: Vec<ScenarioResult> = stream::iter(scenarios)
            .map(|scenario| {
                self.runner
                    .run_isolated(scenario, &self.fixture, self.sessions.as_ref())
            })
            .buffered(self.lanes)
            .collect()
            .await;

        let passed = results.iter().filter(|r| r.passed).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!("Scenario results: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        SuiteResult {
            started_at,
            total: results.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }
}
