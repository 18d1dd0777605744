//! Browse names and display texts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace-qualified name identifying a node among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        Self { namespace, name: name.into() }
    }

    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.name.is_empty()
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.namespace, self.name)
        }
    }
}

impl From<&str> for QualifiedName {
    /// Parses `"2:Speed"` into namespace 2; a bare name lands in namespace 0.
    fn from(s: &str) -> Self {
        match s.split_once(':') {
            Some((ns, name)) => match ns.parse::<u16>() {
                Ok(ns) => QualifiedName::new(ns, name),
                Err(_) => QualifiedName::new(0, s),
            },
            None => QualifiedName::new(0, s),
        }
    }
}

/// Human readable text with an optional locale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LocalizedText {
    pub locale: String,
    pub text: String,
}

impl LocalizedText {
    pub fn new(locale: impl Into<String>, text: impl Into<String>) -> Self {
        Self { locale: locale.into(), text: text.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self { locale: String::new(), text: text.into() }
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl From<&str> for LocalizedText {
    fn from(s: &str) -> Self {
        LocalizedText::text(s)
    }
}

impl From<String> for LocalizedText {
    fn from(s: String) -> Self {
        LocalizedText::text(s)
    }
}
