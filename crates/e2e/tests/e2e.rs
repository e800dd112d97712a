//! E2E scenario harness entry point
//!
//! This file is the test binary that runs the CATS scenarios against a real
//! browser and a freshly seeded application.
//! Run with: cargo test --package catwalk-e2e --test e2e -- --app-binary <path>
//!
//! Flag handling lives in `catwalk_e2e::config` where it is unit tested.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use catwalk_e2e::config::Overrides;
use catwalk_e2e::{HarnessConfig, HarnessResult, SuiteRunner};

#[derive(Parser, Debug)]
#[command(name = "catwalk-e2e")]
#[command(about = "Browser scenario harness for the CATS application")]
struct Args {
    /// Harness configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> HarnessResult<bool> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };
    config.apply_overrides(&args.overrides);

    let scenarios = config.select_scenarios(
        args.overrides.tag.as_deref(),
        args.overrides.name.as_deref(),
    )?;

    let suite = SuiteRunner::new(
        config.scenario_runner(),
        config.fixture.clone(),
        Box::new(config.browser.clone()),
    )
    .with_lanes(config.runner.lanes);

    let results = suite.run_all(&scenarios).await;
    results.write_results(&config.runner.output_dir)?;

    Ok(results.success())
}
