//! Catwalk E2E Scenario Harness
//!
//! This crate drives a real browser against a freshly seeded instance of a
//! web application and checks user-visible behaviour:
//! - Seeds a SQLite database and spawns the application as a subprocess
//! - Controls Chromium over the DevTools protocol
//! - Gates every interaction on an explicit, bounded wait condition
//! - Runs declarative scenarios (built in Rust or loaded from YAML)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  SuiteRunner (lanes: N)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioRunner::run_isolated(scenario)                     │
//! │    ├── ApplicationFixture::start() -> Endpoint              │
//! │    ├── SessionFactory::open() -> BrowserSession             │
//! │    ├── run(scenario, session, fixture) -> ScenarioResult    │
//! │    └── session.close(); fixture.stop()                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario                                                   │
//! │    ├── name, description, tags                              │
//! │    └── steps: [Step]                                        │
//! │          ├── navigate { path }                              │
//! │          ├── wait_for { bind, selector, predicate }         │
//! │          ├── find { bind, selector }                        │
//! │          ├── type_into / clear / click { element }          │
//! │          └── assert_contains / assert_text_equals           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserSession ── Waiter ── dyn BrowserDriver (CDP)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod driver;
pub mod error;
pub mod fixture;
pub mod runner;
pub mod scenario;
pub mod selector;
pub mod session;
pub mod wait;

pub use config::HarnessConfig;
pub use error::{FailureKind, HarnessError, HarnessResult};
pub use fixture::{ApplicationFixture, Endpoint, FixtureConfig, SeedDataset};
pub use runner::{ScenarioResult, ScenarioRunner, SessionFactory, SuiteResult, SuiteRunner};
pub use scenario::{Scenario, Step};
pub use selector::{Selector, SelectorKind};
pub use session::{BrowserConfig, BrowserSession};
pub use wait::{Predicate, WaitCondition, Waiter};
