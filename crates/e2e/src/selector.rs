//! Locator values for elements in the live DOM

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// How a selector expression is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// A CSS selector, used verbatim
    #[default]
    Css,
    /// The element's `id` attribute
    Id,
    /// The element's `name` attribute
    Name,
    /// The element's `data-testid` attribute
    TestId,
}

/// An immutable locator expression.
///
/// A selector may match zero, one or many elements; lookups that need a
/// single element take the first match in document order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSelector", into = "RawSelector")]
pub struct Selector {
    kind: SelectorKind,
    expression: String,
}

impl Selector {
    pub fn new(kind: SelectorKind, expression: impl Into<String>) -> HarnessResult<Self> {
        let expression = expression.into();
        if expression.trim().is_empty() {
            return Err(HarnessError::InvalidSelector(format!(
                "empty {} expression",
                kind.as_str()
            )));
        }
        Ok(Self { kind, expression })
    }

    pub fn css(expression: impl Into<String>) -> HarnessResult<Self> {
        Self::new(SelectorKind::Css, expression)
    }

    pub fn id(id: impl Into<String>) -> HarnessResult<Self> {
        Self::new(SelectorKind::Id, id)
    }

    pub fn name(name: impl Into<String>) -> HarnessResult<Self> {
        Self::new(SelectorKind::Name, name)
    }

    pub fn test_id(test_id: impl Into<String>) -> HarnessResult<Self> {
        Self::new(SelectorKind::TestId, test_id)
    }

    pub fn kind(&self) -> SelectorKind {
        self.kind
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Lower this selector to a CSS selector the browser can evaluate
    pub fn to_css(&self) -> String {
        match self.kind {
            SelectorKind::Css => self.expression.clone(),
            SelectorKind::Id => attribute_selector("id", &self.expression),
            SelectorKind::Name => attribute_selector("name", &self.expression),
            SelectorKind::TestId => attribute_selector("data-testid", &self.expression),
        }
    }
}

fn attribute_selector(attribute: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[{}=\"{}\"]", attribute, escaped)
}

impl SelectorKind {
    fn as_str(&self) -> &'static str {
        match self {
            SelectorKind::Css => "css",
            SelectorKind::Id => "id",
            SelectorKind::Name => "name",
            SelectorKind::TestId => "test_id",
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SelectorKind::Css => f.write_str(&self.expression),
            kind => write!(f, "{}={}", kind.as_str(), self.expression),
        }
    }
}

/// Wire form. A bare string is a CSS selector; a map names the kind.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Css(String),
    Typed {
        #[serde(default)]
        kind: SelectorKind,
        expression: String,
    },
}

impl TryFrom<RawSelector> for Selector {
    type Error = HarnessError;

    fn try_from(raw: RawSelector) -> HarnessResult<Self> {
        match raw {
            RawSelector::Css(expression) => Selector::css(expression),
            RawSelector::Typed { kind, expression } => Selector::new(kind, expression),
        }
    }
}

impl From<Selector> for RawSelector {
    fn from(selector: Selector) -> Self {
        match selector.kind {
            SelectorKind::Css => RawSelector::Css(selector.expression),
            kind => RawSelector::Typed {
                kind,
                expression: selector.expression,
            },
        }
    }
}
