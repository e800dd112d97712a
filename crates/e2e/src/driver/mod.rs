//! The browser capability the harness drives
//!
//! [`BrowserDriver`] is the only seam between the harness and a browser
//! engine. The production implementation speaks CDP ([`cdp::CdpDriver`]);
//! tests use an in-memory page model.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::HarnessResult;
use crate::selector::Selector;

pub mod cdp;
#[cfg(test)]
pub(crate) mod scripted;

pub use cdp::CdpDriver;

/// Opaque handle to an element resolved by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    id: u64,
    selector: Selector,
}

impl ElementRef {
    pub fn new(id: u64, selector: Selector) -> Self {
        Self { id, selector }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The selector this element was resolved from
    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

/// One observation of an element, enough to evaluate any wait predicate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    /// Still attached to the document
    pub connected: bool,
    /// Rendered with a non-empty box and not hidden by style
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
    /// Rendered text (`innerText`)
    pub text: String,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load `url` and return once the browser reports the load event
    async fn navigate(&self, url: &Url) -> HarnessResult<()>;

    /// The first current match for `selector` in document order. The
    /// returned handle stays valid until released or the page navigates.
    async fn first_match(&self, selector: &Selector) -> HarnessResult<Option<ElementRef>>;

    async fn probe(&self, element: &ElementRef) -> HarnessResult<ElementState>;

    /// Drop a handle nobody will use again. Unknown handles are ignored.
    async fn release(&self, element: &ElementRef);

    async fn type_text(&self, element: &ElementRef, text: &str) -> HarnessResult<()>;

    async fn clear(&self, element: &ElementRef) -> HarnessResult<()>;

    async fn click(&self, element: &ElementRef) -> HarnessResult<()>;

    async fn text(&self, element: &ElementRef) -> HarnessResult<String>;

    /// PNG capture of the current viewport
    async fn screenshot(&self) -> HarnessResult<Vec<u8>>;

    /// Shut the browser down. Calling it more than once is a no-op.
    async fn close(&self) -> HarnessResult<()>;
}
