//! Harness configuration file
//!
//! ```yaml
//! fixture:
//!   program: target/debug/cats-app
//!   seed:
//!     - file: fixtures/cat-schema.sql
//!     - file: fixtures/cat-data.sql
//! browser:
//!   no_sandbox: true
//!   default_timeout: 3000
//! runner:
//!   lanes: 2
//!   output_dir: test-results
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::error::{HarnessError, HarnessResult};
use crate::fixture::{FixtureConfig, SeedDataset};
use crate::runner::ScenarioRunner;
use crate::scenario::Scenario;
use crate::session::BrowserConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub fixture: FixtureConfig,
    pub browser: BrowserConfig,
    pub runner: RunnerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Scenarios in flight at once, each with its own app and browser
    pub lanes: usize,

    /// Results file and failure screenshots
    pub output_dir: PathBuf,

    /// YAML scenarios to run instead of the built-in catalog
    pub scenarios_dir: Option<PathBuf>,

    pub screenshots: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            lanes: 1,
            output_dir: PathBuf::from("test-results"),
            scenarios_dir: None,
            screenshots: true,
        }
    }
}

/// Command-line flags layered over the configuration file
#[derive(clap::Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Directory of YAML scenarios (default: built-in catalog)
    #[arg(short, long)]
    pub scenarios: Option<PathBuf>,

    /// Run only the scenario with this name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Run only scenarios with this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Application executable
    #[arg(long, env = "CATWALK_APP_BINARY")]
    pub app_binary: Option<PathBuf>,

    /// Extra argument for the application (repeatable)
    #[arg(long = "app-arg", allow_hyphen_values = true)]
    pub app_args: Vec<String>,

    /// SQL seed script, applied in order (repeatable)
    #[arg(long = "seed")]
    pub seeds: Vec<PathBuf>,

    /// Chrome/Chromium executable
    #[arg(long, env = "CHROME")]
    pub chrome: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Launch Chrome with --no-sandbox
    #[arg(long)]
    pub no_sandbox: bool,

    /// Scenarios in flight at once
    #[arg(long)]
    pub lanes: Option<usize>,

    /// Default wait timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Output directory for results
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl HarnessConfig {
    /// Apply command-line flags. Without any seed configured, the CATS
    /// seed dataset is used.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(program) = &overrides.app_binary {
            self.fixture.program = program.clone();
        }
        if !overrides.app_args.is_empty() {
            self.fixture.args = overrides.app_args.clone();
        }
        if !overrides.seeds.is_empty() {
            self.fixture.seed = SeedDataset::from_files(overrides.seeds.iter().cloned());
        } else if self.fixture.seed.is_empty() {
            self.fixture.seed = catalog::seed_dataset();
        }

        if let Some(chrome) = &overrides.chrome {
            self.browser.chrome_executable = Some(chrome.clone());
        }
        if overrides.headed {
            self.browser.headless = false;
        }
        if overrides.no_sandbox {
            self.browser.no_sandbox = true;
        }
        if let Some(ms) = overrides.timeout_ms {
            self.browser.default_timeout = Duration::from_millis(ms);
        }

        if let Some(lanes) = overrides.lanes {
            self.runner.lanes = lanes.max(1);
        }
        if let Some(dir) = &overrides.scenarios {
            self.runner.scenarios_dir = Some(dir.clone());
        }
        if let Some(output) = &overrides.output {
            self.runner.output_dir = output.clone();
        }
    }

    /// The scenarios to run: the YAML directory if configured, otherwise the
    /// built-in catalog, narrowed by tag and then by name
    pub fn select_scenarios(&self, tag: Option<&str>, name: Option<&str>) -> HarnessResult<Vec<Scenario>> {
        let mut scenarios = match &self.runner.scenarios_dir {
            Some(dir) => Scenario::load_all(dir)?,
            None => catalog::all()?,
        };

        if let Some(tag) = tag {
            scenarios = Scenario::filter_by_tag(&scenarios, tag)
                .into_iter()
                .cloned()
                .collect();
        }
        if let Some(name) = name {
            scenarios.retain(|s| s.name == name);
            if scenarios.is_empty() {
                return Err(HarnessError::Config(format!("Scenario not found: {}", name)));
            }
        }

        Ok(scenarios)
    }

    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let config: HarnessConfig = serde_yaml::from_str(yaml)?;
        if config.runner.lanes == 0 {
            return Err(HarnessError::Config("runner.lanes must be at least 1".to_string()));
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Scenario runner honouring the screenshot settings
    pub fn scenario_runner(&self) -> ScenarioRunner {
        let runner = ScenarioRunner::new();
        if self.runner.screenshots {
            runner.with_artifacts_dir(&self.runner.output_dir)
        } else {
            runner
        }
    }
}
