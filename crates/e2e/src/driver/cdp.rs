//! Chromium driven over the Chrome DevTools Protocol

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::ReleaseObjectParams;
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use reqwest::Url;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{BrowserDriver, ElementRef, ElementState};
use crate::error::{HarnessError, HarnessResult};
use crate::selector::Selector;
use crate::session::BrowserConfig;

/// Snapshot of an element as JSON, so the value survives `callFunctionOn`
/// without `returnByValue`.
const PROBE_JS: &str = r#"function() {
    const style = window.getComputedStyle(this);
    const rect = this.getBoundingClientRect();
    return JSON.stringify({
        connected: this.isConnected,
        visible: this.isConnected
            && style.visibility !== 'hidden'
            && style.display !== 'none'
            && rect.width > 0
            && rect.height > 0,
        enabled: !this.disabled,
        text: this.innerText || ''
    });
}"#;

const IS_CONNECTED_JS: &str = "function() { return this.isConnected; }";

const CLEAR_JS: &str = r#"function() {
    this.value = '';
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

/// CDP error fragments that mean the node or its remote object is gone
const DETACHED_MARKERS: &[&str] = &[
    "Could not find object with given id",
    "Could not find node with given id",
    "No node with given id",
    "Node is detached from document",
    "does not belong to the document",
    "Cannot find context with specified id",
];

/// A live Chromium process with one page
pub struct CdpDriver {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: JoinHandle<()>,
    elements: Mutex<HashMap<u64, Element>>,
    next_id: AtomicU64,
    // Removed when the driver is dropped, after the browser has exited
    _profile_dir: TempDir,
}

impl CdpDriver {
    /// Launch Chromium and open a blank page
    pub async fn launch(config: &BrowserConfig) -> HarnessResult<Self> {
        let profile_dir = tempfile::tempdir().map_err(|e| {
            HarnessError::SessionStart(format!("Failed to create profile directory: {}", e))
        })?;

        let mut builder = chromiumoxide::BrowserConfig::builder()
            .arg("--remote-allow-origins=*")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .user_data_dir(profile_dir.path())
            .window_size(config.viewport_width, config.viewport_height)
            .viewport(None)
            .request_timeout(config.launch_timeout);

        if !config.headless {
            builder = builder.with_head();
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        for arg in &config.extra_args {
            builder = builder.arg(arg.as_str());
        }

        let browser_config = builder.build().map_err(HarnessError::SessionStart)?;

        info!(
            "Launching browser (headless: {}, viewport: {}x{})",
            config.headless, config.viewport_width, config.viewport_height
        );

        let (browser, mut events) = Browser::launch(browser_config)
            .await
            .map_err(|e| HarnessError::SessionStart(format!("Failed to launch browser: {}", e)))?;

        // The handler stream must be polled for any CDP command to complete
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(HarnessError::SessionStart(format!("Failed to open page: {}", e)));
            }
        };

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler,
            elements: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            _profile_dir: profile_dir,
        })
    }

    async fn ensure_connected(&self, element: &ElementRef, handle: &Element) -> HarnessResult<()> {
        let returns = handle
            .call_js_fn(IS_CONNECTED_JS, false)
            .await
            .map_err(|e| interaction_error(element, e))?;
        let connected = returns
            .result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if connected {
            Ok(())
        } else {
            Err(HarnessError::stale(element.selector().to_string()))
        }
    }

    /// Free the page-side object behind a handle
    async fn release_remote(&self, handle: &Element) {
        let params = ReleaseObjectParams::new(handle.remote_object_id.clone());
        if let Err(e) = self.page.execute(params).await {
            trace!("Failed to release remote object: {}", e);
        }
    }
}

fn interaction_error(element: &ElementRef, err: CdpError) -> HarnessError {
    let reason = err.to_string();
    if DETACHED_MARKERS.iter().any(|m| reason.contains(m)) {
        HarnessError::stale(element.selector().to_string())
    } else {
        HarnessError::Interaction {
            selector: element.selector().to_string(),
            reason,
        }
    }
}

/// Looks up the live handle behind an `ElementRef`
macro_rules! handle {
    ($guard:expr, $element:expr) => {
        match $guard.get(&$element.id()) {
            Some(handle) => handle,
            None => return Err(HarnessError::stale($element.selector().to_string())),
        }
    };
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&self, url: &Url) -> HarnessResult<()> {
        debug!("Navigating to {}", url);
        self.page.goto(url.as_str()).await.map_err(|e| HarnessError::Interaction {
            selector: url.to_string(),
            reason: format!("navigation failed: {}", e),
        })?;
        // Handles from the previous document can no longer be used
        self.elements.lock().await.clear();
        Ok(())
    }

    async fn first_match(&self, selector: &Selector) -> HarnessResult<Option<ElementRef>> {
        let found = self
            .page
            .find_elements(selector.to_css())
            .await
            .map_err(|e| HarnessError::Interaction {
                selector: selector.to_string(),
                reason: format!("query failed: {}", e),
            })?;

        let mut found = found.into_iter();
        let Some(first) = found.next() else {
            return Ok(None);
        };
        for extra in found {
            self.release_remote(&extra).await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.elements.lock().await.insert(id, first);
        Ok(Some(ElementRef::new(id, selector.clone())))
    }

    async fn release(&self, element: &ElementRef) {
        let removed = self.elements.lock().await.remove(&element.id());
        if let Some(handle) = removed {
            self.release_remote(&handle).await;
        }
    }

    async fn probe(&self, element: &ElementRef) -> HarnessResult<ElementState> {
        let elements = self.elements.lock().await;
        let handle = handle!(elements, element);

        let returns = handle
            .call_js_fn(PROBE_JS, false)
            .await
            .map_err(|e| interaction_error(element, e))?;
        let raw = returns
            .result
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| HarnessError::Interaction {
                selector: element.selector().to_string(),
                reason: "probe returned no value".to_string(),
            })?;

        Ok(serde_json::from_str(&raw)?)
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> HarnessResult<()> {
        let elements = self.elements.lock().await;
        let handle = handle!(elements, element);
        self.ensure_connected(element, handle).await?;

        handle.focus().await.map_err(|e| interaction_error(element, e))?;
        handle.type_str(text).await.map_err(|e| interaction_error(element, e))?;
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> HarnessResult<()> {
        let elements = self.elements.lock().await;
        let handle = handle!(elements, element);
        self.ensure_connected(element, handle).await?;

        handle
            .call_js_fn(CLEAR_JS, false)
            .await
            .map_err(|e| interaction_error(element, e))?;
        Ok(())
    }

    async fn click(&self, element: &ElementRef) -> HarnessResult<()> {
        let elements = self.elements.lock().await;
        let handle = handle!(elements, element);
        self.ensure_connected(element, handle).await?;

        handle.click().await.map_err(|e| interaction_error(element, e))?;
        Ok(())
    }

    async fn text(&self, element: &ElementRef) -> HarnessResult<String> {
        let elements = self.elements.lock().await;
        let handle = handle!(elements, element);
        self.ensure_connected(element, handle).await?;

        let text = handle
            .inner_text()
            .await
            .map_err(|e| interaction_error(element, e))?;
        Ok(text.unwrap_or_default())
    }

    async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| HarnessError::Interaction {
                selector: "page".to_string(),
                reason: format!("screenshot failed: {}", e),
            })
    }

    async fn close(&self) -> HarnessResult<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        self.elements.lock().await.clear();

        info!("Closing browser");
        if let Err(e) = browser.close().await {
            warn!("Browser did not acknowledge close: {}", e);
        }
        if let Err(e) = browser.wait().await {
            warn!("Failed to reap browser process: {}", e);
        }
        self.handler.abort();
        Ok(())
    }
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        if let Some(browser) = self.browser.get_mut().take() {
            // Dropping the Browser kills the child process
            warn!("Browser dropped without close(); killing process");
            drop(browser);
        }
        self.handler.abort();
    }
}
