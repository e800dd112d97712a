//! Declarative scenarios: ordered interaction and assertion steps
//!
//! A scenario never touches the browser itself; the runner executes it.
//! Steps refer to elements by binding name, and every name must be bound
//! by an earlier `wait_for` or `find` on the same page.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::selector::Selector;
use crate::wait::{Predicate, WaitCondition};

/// A named, ordered sequence of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps to execute in order
    pub steps: Vec<Step>,
}

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load a path relative to the application endpoint
    Navigate { path: String },

    /// Wait for a condition and bind the element under `bind`
    WaitFor {
        bind: String,
        selector: Selector,
        #[serde(default)]
        predicate: Predicate,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Immediate lookup, for elements a previous wait already made ready
    Find { bind: String, selector: Selector },

    TypeInto { element: String, text: String },

    Clear { element: String },

    Click { element: String },

    /// The element's text must contain every substring
    AssertContains {
        element: String,
        expected: Vec<String>,
    },

    AssertTextEquals { element: String, expected: String },
}

impl Step {
    /// Short label for logs and reports
    pub fn name(&self) -> String {
        match self {
            Step::Navigate { path } => format!("navigate:{}", path),
            Step::WaitFor { bind, predicate, .. } => format!("wait_for:{}:{}", bind, predicate),
            Step::Find { bind, .. } => format!("find:{}", bind),
            Step::TypeInto { element, .. } => format!("type_into:{}", element),
            Step::Clear { element } => format!("clear:{}", element),
            Step::Click { element } => format!("click:{}", element),
            Step::AssertContains { element, .. } => format!("assert_contains:{}", element),
            Step::AssertTextEquals { element, .. } => format!("assert_text_equals:{}", element),
        }
    }

    /// The binding this step produces, if any
    pub fn binds(&self) -> Option<&str> {
        match self {
            Step::WaitFor { bind, .. } | Step::Find { bind, .. } => Some(bind),
            _ => None,
        }
    }

    /// The binding this step consumes, if any
    pub fn uses(&self) -> Option<&str> {
        match self {
            Step::TypeInto { element, .. }
            | Step::Clear { element }
            | Step::Click { element }
            | Step::AssertContains { element, .. }
            | Step::AssertTextEquals { element, .. } => Some(element),
            _ => None,
        }
    }

    /// The wait condition of a `WaitFor` step
    pub fn wait_condition(&self) -> Option<WaitCondition> {
        match self {
            Step::WaitFor {
                selector,
                predicate,
                timeout_ms,
                ..
            } => Some(WaitCondition {
                selector: selector.clone(),
                predicate: predicate.clone(),
                timeout: timeout_ms.map(Duration::from_millis),
            }),
            _ => None,
        }
    }
}

impl Scenario {
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            scenario: Scenario {
                name: name.into(),
                description: String::new(),
                tags: Vec::new(),
                steps: Vec::new(),
            },
        }
    }

    /// Check that every element a step uses was bound earlier on the same
    /// page. Navigation discards all earlier bindings.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::ScenarioParse("scenario name is empty".to_string()));
        }

        let mut bound: HashSet<&str> = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if let Step::Navigate { .. } = step {
                bound.clear();
            }
            if let Some(name) = step.uses() {
                if !bound.contains(name) {
                    return Err(HarnessError::UnboundElement {
                        step: index,
                        name: name.to_string(),
                    });
                }
            }
            if let Some(name) = step.binds() {
                bound.insert(name);
            }
        }
        Ok(())
    }

    /// Parse and validate a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| {
            HarnessError::ScenarioParse(format!("{}: {}", path.display(), e))
        })
    }

    /// Load all scenarios from a directory, sorted by path
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }
}

/// Fluent construction of a [`Scenario`]
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl ScenarioBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.scenario.description = description.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.scenario.tags.push(tag.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.scenario.steps.push(step);
        self
    }

    pub fn navigate(self, path: impl Into<String>) -> Self {
        self.step(Step::Navigate { path: path.into() })
    }

    pub fn wait_for(self, bind: impl Into<String>, condition: WaitCondition) -> Self {
        self.step(Step::WaitFor {
            bind: bind.into(),
            selector: condition.selector,
            predicate: condition.predicate,
            timeout_ms: condition.timeout.map(|t| t.as_millis() as u64),
        })
    }

    pub fn find(self, bind: impl Into<String>, selector: Selector) -> Self {
        self.step(Step::Find {
            bind: bind.into(),
            selector,
        })
    }

    pub fn type_into(self, element: impl Into<String>, text: impl Into<String>) -> Self {
        self.step(Step::TypeInto {
            element: element.into(),
            text: text.into(),
        })
    }

    pub fn clear(self, element: impl Into<String>) -> Self {
        self.step(Step::Clear {
            element: element.into(),
        })
    }

    pub fn click(self, element: impl Into<String>) -> Self {
        self.step(Step::Click {
            element: element.into(),
        })
    }

    pub fn assert_contains<I, S>(self, element: impl Into<String>, expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step(Step::AssertContains {
            element: element.into(),
            expected: expected.into_iter().map(Into::into).collect(),
        })
    }

    pub fn assert_text_equals(self, element: impl Into<String>, expected: impl Into<String>) -> Self {
        self.step(Step::AssertTextEquals {
            element: element.into(),
            expected: expected.into(),
        })
    }

    /// Finish and validate bindings
    pub fn build(self) -> HarnessResult<Scenario> {
        self.scenario.validate()?;
        Ok(self.scenario)
    }
}
