//! Browser session: one live browser bound to one scenario lane

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, CdpDriver, ElementRef};
use crate::error::{HarnessError, HarnessResult};
use crate::selector::Selector;
use crate::wait::{WaitCondition, Waiter, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};

/// Owns exactly one browser instance.
///
/// Always finish with [`BrowserSession::close`]; dropping an unclosed
/// session still kills the browser, but without a clean shutdown.
pub struct BrowserSession {
    driver: Box<dyn BrowserDriver>,
    waiter: Waiter,
    closed: bool,
}

impl BrowserSession {
    /// Launch a browser with the given configuration
    pub async fn open(config: &BrowserConfig) -> HarnessResult<Self> {
        let driver = CdpDriver::launch(config).await?;
        info!("Browser session opened");
        Ok(Self::with_driver(
            Box::new(driver),
            Waiter::new(config.poll_interval, config.default_timeout),
        ))
    }

    /// Wrap an already-running driver
    pub fn with_driver(driver: Box<dyn BrowserDriver>, waiter: Waiter) -> Self {
        Self {
            driver,
            waiter,
            closed: false,
        }
    }

    /// Load `url` and block until the initial load completes.
    ///
    /// Dynamic content may still be rendering afterwards; gate the next
    /// interaction on a [`WaitCondition`].
    pub async fn navigate(&self, url: &Url) -> HarnessResult<()> {
        debug!("navigate {}", url);
        self.driver.navigate(url).await
    }

    /// Immediate lookup, no waiting. First match in document order.
    pub async fn find(&self, selector: &Selector) -> HarnessResult<ElementRef> {
        self.driver
            .first_match(selector)
            .await?
            .ok_or_else(|| HarnessError::NotFound {
                selector: selector.to_string(),
            })
    }

    pub async fn await_condition(&self, condition: &WaitCondition) -> HarnessResult<ElementRef> {
        self.waiter.await_condition(self.driver.as_ref(), condition).await
    }

    pub async fn type_text(&self, element: &ElementRef, text: &str) -> HarnessResult<()> {
        self.driver.type_text(element, text).await
    }

    pub async fn clear(&self, element: &ElementRef) -> HarnessResult<()> {
        self.driver.clear(element).await
    }

    pub async fn click(&self, element: &ElementRef) -> HarnessResult<()> {
        self.driver.click(element).await
    }

    /// Rendered text of the element
    pub async fn text(&self, element: &ElementRef) -> HarnessResult<String> {
        self.driver.text(element).await
    }

    pub async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
        self.driver.screenshot().await
    }

    /// Shut the browser down
    pub async fn close(mut self) -> HarnessResult<()> {
        self.closed = true;
        info!("Closing browser session");
        self.driver.close().await
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Browser session dropped without close()");
        }
    }
}

/// Configuration for launching a browser
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Chrome/Chromium binary; `None` searches the usual locations
    pub chrome_executable: Option<PathBuf>,

    pub headless: bool,

    /// Pass `--no-sandbox` (needed in most containers)
    pub no_sandbox: bool,

    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Additional command-line switches
    pub extra_args: Vec<String>,

    /// Timeout for browser launch and individual CDP requests
    #[serde(with = "duration_ms")]
    pub launch_timeout: Duration,

    /// Default timeout for waits that do not set their own
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,

    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            headless: true,
            no_sandbox: false,
            viewport_width: 1920,
            viewport_height: 1080,
            extra_args: Vec::new(),
            launch_timeout: Duration::from_secs(20),
            default_timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
