//! In-memory page model for exercising the harness without a browser
//!
//! Selectors match by their lowered CSS text exactly; there is no CSS
//! engine. Elements can be scheduled to appear later on the tokio clock,
//! so paused-time tests stay deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::time::Instant;

use super::{BrowserDriver, ElementRef, ElementState};
use crate::error::{HarnessError, HarnessResult};
use crate::selector::Selector;

type Reaction = Box<dyn Fn(&mut PageModel) + Send>;

pub(crate) struct FakeElement {
    css: String,
    state: ElementState,
    appears_at: Instant,
    is_input: bool,
    checked: bool,
}

#[derive(Default)]
pub(crate) struct PageModel {
    elements: Vec<FakeElement>,
    reactions: HashMap<String, Reaction>,
    pub log: Vec<String>,
    pub queries: usize,
    pub released: usize,
    pub closes: usize,
    pub fail_navigation: bool,
}

impl PageModel {
    /// Add a visible, enabled element; returns its index
    pub fn add(&mut self, css: &str, text: &str) -> usize {
        self.add_after(css, text, Duration::ZERO)
    }

    pub fn add_after(&mut self, css: &str, text: &str, delay: Duration) -> usize {
        self.elements.push(FakeElement {
            css: css.to_string(),
            state: ElementState {
                connected: true,
                visible: true,
                enabled: true,
                text: text.to_string(),
            },
            appears_at: Instant::now() + delay,
            is_input: false,
            checked: false,
        });
        self.elements.len() - 1
    }

    pub fn add_input(&mut self, css: &str, value: &str) -> usize {
        let index = self.add(css, value);
        self.elements[index].is_input = true;
        index
    }

    pub fn set_text(&mut self, css: &str, text: &str) {
        for element in self.matching_mut(css) {
            element.state.text = text.to_string();
        }
    }

    pub fn set_visible(&mut self, css: &str, visible: bool) {
        for element in self.matching_mut(css) {
            element.state.visible = visible;
        }
    }

    pub fn set_enabled(&mut self, css: &str, enabled: bool) {
        for element in self.matching_mut(css) {
            element.state.enabled = enabled;
        }
    }

    /// Detach every element matching `css` from the document
    pub fn detach(&mut self, css: &str) {
        for element in self.matching_mut(css) {
            element.state.connected = false;
        }
    }

    pub fn set_checked(&mut self, css: &str, checked: bool) {
        for element in self.matching_mut(css) {
            element.checked = checked;
        }
    }

    pub fn toggle(&mut self, css: &str) {
        for element in self.matching_mut(css) {
            element.checked = !element.checked;
        }
    }

    pub fn is_checked(&self, css: &str) -> bool {
        self.elements.iter().any(|e| e.css == css && e.checked)
    }

    /// Text of the first connected element matching `css`
    pub fn text_by_css(&self, css: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|e| e.css == css && e.state.connected)
            .map(|e| e.state.text.as_str())
    }

    pub fn on_click(&mut self, css: &str, reaction: impl Fn(&mut PageModel) + Send + 'static) {
        self.reactions.insert(css.to_string(), Box::new(reaction));
    }

    pub fn text_of(&self, index: usize) -> &str {
        &self.elements[index].state.text
    }

    fn matching_mut<'a>(&'a mut self, css: &'a str) -> impl Iterator<Item = &'a mut FakeElement> + 'a {
        self.elements.iter_mut().filter(move |e| e.css == css)
    }
}

/// Cloneable handle: one clone drives the session, another inspects the page
#[derive(Clone, Default)]
pub(crate) struct ScriptedDriver {
    page: Arc<Mutex<PageModel>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self) -> MutexGuard<'_, PageModel> {
        self.page.lock().unwrap()
    }

    fn live(&self, element: &ElementRef) -> HarnessResult<usize> {
        let page = self.page();
        let index = element.id() as usize;
        match page.elements.get(index) {
            Some(e) if e.state.connected => Ok(index),
            _ => Err(HarnessError::stale(element.selector().to_string())),
        }
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&self, url: &Url) -> HarnessResult<()> {
        let mut page = self.page();
        if page.fail_navigation {
            return Err(HarnessError::Interaction {
                selector: url.to_string(),
                reason: "navigation failed: net::ERR_CONNECTION_REFUSED".to_string(),
            });
        }
        page.log.push(format!("navigate:{}", url));
        Ok(())
    }

    async fn first_match(&self, selector: &Selector) -> HarnessResult<Option<ElementRef>> {
        let css = selector.to_css();
        let now = Instant::now();
        let mut page = self.page();
        page.queries += 1;
        Ok(page
            .elements
            .iter()
            .position(|e| e.css == css && e.state.connected && e.appears_at <= now)
            .map(|i| ElementRef::new(i as u64, selector.clone())))
    }

    async fn release(&self, _element: &ElementRef) {
        self.page().released += 1;
    }

    async fn probe(&self, element: &ElementRef) -> HarnessResult<ElementState> {
        let page = self.page();
        page.elements
            .get(element.id() as usize)
            .map(|e| e.state.clone())
            .ok_or_else(|| HarnessError::stale(element.selector().to_string()))
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> HarnessResult<()> {
        let index = self.live(element)?;
        let mut page = self.page();
        page.elements[index].state.text.push_str(text);
        page.log.push(format!("type:{}:{}", element.selector(), text));
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> HarnessResult<()> {
        let index = self.live(element)?;
        let mut page = self.page();
        if page.elements[index].is_input {
            page.elements[index].state.text.clear();
        }
        page.log.push(format!("clear:{}", element.selector()));
        Ok(())
    }

    async fn click(&self, element: &ElementRef) -> HarnessResult<()> {
        let index = self.live(element)?;
        let mut page = self.page();
        page.log.push(format!("click:{}", element.selector()));

        let css = page.elements[index].css.clone();
        if let Some(reaction) = page.reactions.remove(&css) {
            reaction(&mut *page);
            page.reactions.insert(css, reaction);
        }
        Ok(())
    }

    async fn text(&self, element: &ElementRef) -> HarnessResult<String> {
        let index = self.live(element)?;
        Ok(self.page().elements[index].state.text.clone())
    }

    async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    async fn close(&self) -> HarnessResult<()> {
        self.page().closes += 1;
        Ok(())
    }
}
