//! Predicate-driven waiting on asynchronous DOM state
//!
//! A [`WaitCondition`] turns an instantaneous, possibly-false check into a
//! bounded blocking call: the [`Waiter`] re-queries the page every
//! `poll_interval` until the predicate holds or the timeout elapses. There
//! are no fixed sleeps anywhere else in the harness.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::driver::{BrowserDriver, ElementRef, ElementState};
use crate::error::{HarnessError, HarnessResult};
use crate::selector::Selector;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What must hold for a wait to succeed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// The element exists in the document
    Present,
    /// The element exists, is visible and is not disabled
    #[default]
    Clickable,
    /// The element's rendered text includes the substring
    TextContains(String),
}

impl Predicate {
    pub fn holds(&self, state: &ElementState) -> bool {
        if !state.connected {
            return false;
        }
        match self {
            Predicate::Present => true,
            Predicate::Clickable => state.visible && state.enabled,
            Predicate::TextContains(expected) => state.text.contains(expected.as_str()),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Present => f.write_str("present"),
            Predicate::Clickable => f.write_str("clickable"),
            Predicate::TextContains(expected) => write!(f, "containing text {:?}", expected),
        }
    }
}

/// A predicate over one selector, bounded by a timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitCondition {
    pub selector: Selector,
    pub predicate: Predicate,
    /// `None` uses the waiter's default
    pub timeout: Option<Duration>,
}

impl WaitCondition {
    pub fn new(selector: Selector, predicate: Predicate) -> Self {
        Self {
            selector,
            predicate,
            timeout: None,
        }
    }

    pub fn present(selector: Selector) -> Self {
        Self::new(selector, Predicate::Present)
    }

    pub fn clickable(selector: Selector) -> Self {
        Self::new(selector, Predicate::Clickable)
    }

    pub fn text_contains(selector: Selector, expected: impl Into<String>) -> Self {
        Self::new(selector, Predicate::TextContains(expected.into()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Polls a driver until a condition holds
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    pub poll_interval: Duration,
    pub default_timeout: Duration,
}

impl Default for Waiter {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Waiter {
    pub fn new(poll_interval: Duration, default_timeout: Duration) -> Self {
        Self {
            poll_interval,
            default_timeout,
        }
    }

    /// Block until `condition` holds for the first match of its selector.
    ///
    /// Detached elements count as "not yet". Any other driver failure ends
    /// the wait immediately. The deadline is never exceeded by more than one
    /// poll interval, even when a single driver call hangs.
    pub async fn await_condition(
        &self,
        driver: &dyn BrowserDriver,
        condition: &WaitCondition,
    ) -> HarnessResult<ElementRef> {
        let timeout = condition.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();
        let mut polls = 0usize;

        loop {
            polls += 1;
            let budget = timeout.saturating_sub(start.elapsed()) + self.poll_interval;
            match tokio::time::timeout(budget, self.check(driver, condition)).await {
                Ok(Ok(Some(element))) => {
                    debug!(
                        "'{}' {} after {} poll(s) ({} ms)",
                        condition.selector,
                        condition.predicate,
                        polls,
                        start.elapsed().as_millis()
                    );
                    return Ok(element);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!("'{}' poll {} outlived the deadline", condition.selector, polls);
                    return Err(not_ready(condition, start.elapsed()));
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(not_ready(condition, elapsed));
            }

            sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    async fn check(
        &self,
        driver: &dyn BrowserDriver,
        condition: &WaitCondition,
    ) -> HarnessResult<Option<ElementRef>> {
        let Some(first) = driver.first_match(&condition.selector).await? else {
            trace!("'{}' has no match yet", condition.selector);
            return Ok(None);
        };

        let satisfied = match driver.probe(&first).await {
            Ok(state) => condition.predicate.holds(&state),
            Err(e) if e.is_stale() => false,
            Err(e) => return Err(e),
        };
        if satisfied {
            Ok(Some(first))
        } else {
            // Only the handle that satisfies the wait is kept
            driver.release(&first).await;
            Ok(None)
        }
    }
}

fn not_ready(condition: &WaitCondition, waited: Duration) -> HarnessError {
    HarnessError::ElementNotReady {
        selector: condition.selector.to_string(),
        predicate: condition.predicate.to_string(),
        waited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::ScriptedDriver;
    use test_case::test_case;

    fn state(connected: bool, visible: bool, enabled: bool, text: &str) -> ElementState {
        ElementState {
            connected,
            visible,
            enabled,
            text: text.to_string(),
        }
    }

    #[test_case(Predicate::Present, state(true, false, false, ""), true ; "present ignores visibility")]
    #[test_case(Predicate::Present, state(false, true, true, ""), false ; "detached is never present")]
    #[test_case(Predicate::Clickable, state(true, true, true, ""), true ; "clickable")]
    #[test_case(Predicate::Clickable, state(true, false, true, ""), false ; "hidden is not clickable")]
    #[test_case(Predicate::Clickable, state(true, true, false, ""), false ; "disabled is not clickable")]
    #[test_case(Predicate::TextContains("Length: 22".into()), state(true, true, true, "David Meowie\nLength: 22"), true ; "text contains")]
    #[test_case(Predicate::TextContains("Length: 2".into()), state(true, true, true, "Length: 12"), false ; "text mismatch")]
    fn test_predicate_holds(predicate: Predicate, state: ElementState, expected: bool) {
        assert_eq!(predicate.holds(&state), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_as_soon_as_satisfied() {
        let driver = ScriptedDriver::new();
        driver.page().add_after("#catName", "", Duration::from_millis(450));

        let waiter = Waiter::default();
        let start = Instant::now();
        let condition = WaitCondition::clickable(Selector::css("#catName").unwrap());
        let element = waiter.await_condition(&driver, &condition).await.unwrap();

        let elapsed = start.elapsed();
        assert_eq!(element.selector().expression(), "#catName");
        assert!(elapsed >= Duration::from_millis(450));
        assert!(elapsed <= Duration::from_millis(450) + waiter.poll_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_one_poll_of_deadline() {
        let driver = ScriptedDriver::new();
        let waiter = Waiter::new(Duration::from_millis(250), DEFAULT_TIMEOUT);
        let condition = WaitCondition::present(Selector::css("#never").unwrap())
            .with_timeout(Duration::from_millis(1000));

        let start = Instant::now();
        let err = waiter.await_condition(&driver, &condition).await.unwrap_err();
        let elapsed = start.elapsed();

        match err {
            HarnessError::ElementNotReady { selector, predicate, waited } => {
                assert_eq!(selector, "#never");
                assert_eq!(predicate, "present");
                assert!(waited >= Duration::from_millis(1000));
                assert!(waited <= Duration::from_millis(1250));
            }
            other => panic!("expected ElementNotReady, got {other:?}"),
        }
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed <= Duration::from_millis(1250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_is_three_seconds() {
        let driver = ScriptedDriver::new();
        let waiter = Waiter::default();
        let condition = WaitCondition::clickable(Selector::css("#catEvil").unwrap());

        let err = waiter.await_condition(&driver, &condition).await.unwrap_err();
        let HarnessError::ElementNotReady { waited, .. } = err else {
            panic!("expected ElementNotReady");
        };
        assert!(waited >= Duration::from_secs(3));
        assert!(waited <= Duration::from_secs(3) + DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_in_document_order_is_used() {
        let driver = ScriptedDriver::new();
        {
            let mut page = driver.page();
            page.add("#output > div > div", "Mr Bigglesworth");
            page.add("#output > div > div", "David Meowie");
        }

        let condition = WaitCondition::present(Selector::css("#output > div > div").unwrap());
        let element = Waiter::default().await_condition(&driver, &condition).await.unwrap();
        assert_eq!(element.id(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_text_to_change() {
        let driver = ScriptedDriver::new();
        driver.page().add("#card", "Mr Bigglesworth");

        let poller = driver.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(700)).await;
            poller.page().set_text("#card", "Catrick Swayze\nLength: 12");
        });

        let condition = WaitCondition::text_contains(Selector::css("#card").unwrap(), "Catrick Swayze");
        let start = Instant::now();
        Waiter::default().await_condition(&driver, &condition).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_element_is_not_clickable_until_enabled() {
        let driver = ScriptedDriver::new();
        driver.page().add("#submit", "Submit");
        driver.page().set_enabled("#submit", false);

        let condition = WaitCondition::clickable(Selector::css("#submit").unwrap())
            .with_timeout(Duration::from_millis(300));
        let err = Waiter::default().await_condition(&driver, &condition).await.unwrap_err();
        assert!(matches!(err, HarnessError::ElementNotReady { .. }));

        driver.page().set_enabled("#submit", true);
        Waiter::default().await_condition(&driver, &condition).await.unwrap();
    }

    /// Answers every call, but only after `delay`
    struct SlowDriver {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl BrowserDriver for SlowDriver {
        async fn navigate(&self, _url: &reqwest::Url) -> HarnessResult<()> {
            Ok(())
        }

        async fn first_match(&self, _selector: &Selector) -> HarnessResult<Option<ElementRef>> {
            sleep(self.delay).await;
            Ok(None)
        }

        async fn probe(&self, _element: &ElementRef) -> HarnessResult<ElementState> {
            sleep(self.delay).await;
            Ok(ElementState::default())
        }

        async fn release(&self, _element: &ElementRef) {}

        async fn type_text(&self, _element: &ElementRef, _text: &str) -> HarnessResult<()> {
            Ok(())
        }

        async fn clear(&self, _element: &ElementRef) -> HarnessResult<()> {
            Ok(())
        }

        async fn click(&self, _element: &ElementRef) -> HarnessResult<()> {
            Ok(())
        }

        async fn text(&self, _element: &ElementRef) -> HarnessResult<String> {
            Ok(String::new())
        }

        async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn close(&self) -> HarnessResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_driver_call_still_honours_deadline() {
        let driver = SlowDriver {
            delay: Duration::from_secs(10),
        };
        let waiter = Waiter::default();
        let condition = WaitCondition::present(Selector::css("#never").unwrap())
            .with_timeout(Duration::from_millis(1000));

        let start = Instant::now();
        let err = waiter.await_condition(&driver, &condition).await.unwrap_err();
        let elapsed = start.elapsed();

        let HarnessError::ElementNotReady { waited, .. } = err else {
            panic!("expected ElementNotReady, got {err:?}");
        };
        assert!(waited >= Duration::from_millis(1000));
        assert!(waited <= Duration::from_millis(1000) + waiter.poll_interval);
        assert!(elapsed <= Duration::from_millis(1000) + waiter.poll_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsatisfied_polls_release_their_handles() {
        let driver = ScriptedDriver::new();
        driver.page().add("#submit", "Submit");
        driver.page().set_enabled("#submit", false);

        let poller = driver.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(550)).await;
            poller.page().set_enabled("#submit", true);
        });

        let condition = WaitCondition::clickable(Selector::css("#submit").unwrap());
        Waiter::default().await_condition(&driver, &condition).await.unwrap();

        let page = driver.page();
        assert!(page.queries > 1);
        assert_eq!(page.released, page.queries - 1);
    }
}
