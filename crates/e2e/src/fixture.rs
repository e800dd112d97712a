//! Application fixture - seeding, spawning and health checking the target app

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use reqwest::Url;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::session::duration_ms;

/// Base address of a live, seeded application instance.
///
/// Only [`ApplicationFixture::start`] creates one, and only after the
/// instance has answered its health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    pub fn url(&self) -> &Url {
        &self.base
    }

    pub fn port(&self) -> u16 {
        self.base.port_or_known_default().unwrap_or_default()
    }

    /// Resolve `path` against the base URL
    pub fn join(&self, path: &str) -> HarnessResult<Url> {
        self.base
            .join(path)
            .map_err(|e| HarnessError::Config(format!("Invalid path '{}': {}", path, e)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.base.fmt(f)
    }
}

/// One seed script: a file on disk or inline SQL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedScript {
    File { file: PathBuf },
    Inline { sql: String },
}

impl SeedScript {
    fn load(&self) -> HarnessResult<String> {
        match self {
            SeedScript::File { file } => std::fs::read_to_string(file).map_err(|e| {
                HarnessError::FixtureStart(format!(
                    "Failed to read seed script {}: {}",
                    file.display(),
                    e
                ))
            }),
            SeedScript::Inline { sql } => Ok(sql.clone()),
        }
    }
}

/// Ordered schema and data scripts, applied as a whole or not at all
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedDataset {
    scripts: Vec<SeedScript>,
}

impl SeedDataset {
    pub fn from_statements<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scripts: statements
                .into_iter()
                .map(|sql| SeedScript::Inline { sql: sql.into() })
                .collect(),
        }
    }

    pub fn from_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            scripts: files
                .into_iter()
                .map(|file| SeedScript::File { file: file.into() })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn scripts(&self) -> &[SeedScript] {
        &self.scripts
    }

    /// Execute every script in order inside one transaction
    pub fn apply(&self, conn: &mut Connection) -> HarnessResult<()> {
        let tx = conn.transaction()?;
        for script in &self.scripts {
            tx.execute_batch(&script.load()?)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop every user table, then apply the dataset, atomically
    pub fn reapply(&self, conn: &mut Connection) -> HarnessResult<()> {
        let tx = conn.transaction()?;

        let tables: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for table in &tables {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\";", table.replace('"', "\"\"")))?;
        }
        debug!("Dropped {} table(s) before reseed", tables.len());

        for script in &self.scripts {
            tx.execute_batch(&script.load()?)?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Handle to one running, seeded application instance
#[derive(Debug)]
pub struct ApplicationFixture {
    child: Child,
    endpoint: Endpoint,
    database_path: PathBuf,
    seed: SeedDataset,
    workdir: Option<TempDir>,
    stopped: bool,
}

impl ApplicationFixture {
    /// Seed a fresh database, boot the application on a free port and wait
    /// until it answers.
    pub async fn start(config: FixtureConfig) -> HarnessResult<Self> {
        let workdir = tempfile::Builder::new()
            .prefix("catwalk-fixture-")
            .tempdir()
            .map_err(|e| HarnessError::FixtureStart(format!("Failed to create workdir: {}", e)))?;
        let database_path = workdir.path().join("app.db");

        let mut conn = Connection::open(&database_path).map_err(|e| {
            HarnessError::FixtureStart(format!("Failed to create seed database: {}", e))
        })?;
        config.seed.apply(&mut conn).map_err(|e| match e {
            HarnessError::FixtureStart(msg) => HarnessError::FixtureStart(msg),
            other => HarnessError::FixtureStart(format!("Seeding failed: {}", other)),
        })?;
        drop(conn);
        info!(
            "Seeded {} script(s) into {}",
            config.seed.scripts().len(),
            database_path.display()
        );

        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base = Url::parse(&format!("http://{}:{}/", config.host, port))
            .map_err(|e| HarnessError::FixtureStart(format!("Invalid host '{}': {}", config.host, e)))?;
        let health_url = base.join(&config.health_path).map_err(|e| {
            HarnessError::FixtureStart(format!("Invalid health path '{}': {}", config.health_path, e))
        })?;

        info!("Spawning {} on port {}", config.program.display(), port);

        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .env(&config.port_env, port.to_string())
            .env(&config.database_env, &database_path)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            HarnessError::FixtureStart(format!(
                "Failed to spawn {}: {}",
                config.program.display(),
                e
            ))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let mut fixture = ApplicationFixture {
            child,
            endpoint: Endpoint { base },
            database_path,
            seed: config.seed,
            workdir: Some(workdir),
            stopped: false,
        };

        if let Err(e) = fixture.wait_for_healthy(&health_url, config.startup_timeout).await {
            if let Err(stop_err) = fixture.stop().await {
                warn!("Failed to stop application after startup failure: {}", stop_err);
            }
            return Err(e);
        }

        info!("Application is ready at {}", fixture.endpoint);
        Ok(fixture)
    }

    /// Poll the health URL until it succeeds, the process exits, or the
    /// startup timeout passes
    async fn wait_for_healthy(&mut self, health_url: &Url, timeout: Duration) -> HarnessResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;

            if let Some(status) = self.child.try_wait()? {
                return Err(HarnessError::FixtureStart(format!(
                    "Application exited during startup ({})",
                    status
                )));
            }

            match client.get(health_url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    warn!("Health check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for application to start...");
                    }
                    // Connection refused is expected while the app boots
                    if !e.is_connect() {
                        warn!("Health check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(HarnessError::FixtureStart(format!(
            "Health check failed after {} attempts ({} ms)",
            attempts,
            timeout.as_millis()
        )))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// OS process id of the application, while it runs
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Restore the seed dataset: drop all tables and repopulate
    pub fn reseed(&self) -> HarnessResult<()> {
        let mut conn = Connection::open(&self.database_path)?;
        self.seed.reapply(&mut conn)?;
        info!("Reseeded {}", self.database_path.display());
        Ok(())
    }

    /// Stop the application. Safe to call more than once.
    pub async fn stop(&mut self) -> HarnessResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if let Some(pid) = self.child.id() {
            info!("Stopping application (pid: {})", pid);

            // Try graceful shutdown first
            #[cfg(unix)]
            {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && tokio::time::timeout(Duration::from_millis(500), self.child.wait())
                        .await
                        .is_ok()
                {
                    debug!("Application exited after SIGTERM");
                }
            }

            // Force kill if still running
            if self.child.try_wait()?.is_none() {
                self.child.kill().await?;
            }
        }

        if let Some(workdir) = self.workdir.take() {
            if let Err(e) = workdir.close() {
                warn!("Failed to remove fixture workdir: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for ApplicationFixture {
    fn drop(&mut self) {
        if !self.stopped {
            warn!("Application fixture dropped without stop(); killing process");
            let _ = self.child.start_kill();
        }
    }
}

async fn forward_output<R: AsyncRead + Unpin>(stream: R, name: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "catwalk::app", stream = name, "{}", line);
    }
}

/// Configuration for starting the target application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Executable that boots the application
    pub program: PathBuf,

    pub args: Vec<String>,

    /// Extra environment for the application
    pub env: Vec<(String, String)>,

    pub working_dir: Option<PathBuf>,

    pub host: String,

    /// Port to listen on (None = ask the OS for a free one)
    pub port: Option<u16>,

    /// Environment variable that receives the port
    pub port_env: String,

    /// Environment variable that receives the seeded database path
    pub database_env: String,

    /// Path polled for readiness
    pub health_path: String,

    #[serde(with = "duration_ms")]
    pub startup_timeout: Duration,

    pub seed: SeedDataset,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("target/debug/cats-app"),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            host: "127.0.0.1".to_string(),
            port: None,
            port_env: "SERVER_PORT".to_string(),
            database_env: "DATABASE_PATH".to_string(),
            health_path: "/".to_string(),
            startup_timeout: Duration::from_secs(30),
            seed: SeedDataset::default(),
        }
    }
}

/// Ask the OS for a free port
fn find_free_port() -> HarnessResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| HarnessError::FixtureStart(format!("Failed to bind to find free port: {}", e)))?;
    Ok(listener.local_addr()?.port())
}
