use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One requirement of a label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    /// `key=value` (also written `key==value`)
    Equals(String, String),
    /// `key!=value`
    NotEquals(String, String),
    /// `key`
    Exists(String),
    /// `!key`
    NotExists(String),
}

/// A parsed label selector: a comma-separated conjunction of requirements.
///
/// The empty selector matches every label set. Evaluation is a pure
/// predicate; the same selector and label state always agree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Parse a selector expression, e.g. `app=helloworld,tier!=canary,gpu`.
    pub fn parse(expr: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in expr.split(',') {
            let term = term.trim();
            if term.is_empty() {
                if expr.trim().is_empty() {
                    break;
                }
                bail!("selector '{}' has an empty requirement", expr);
            }
            requirements.push(Self::parse_term(term)?);
        }
        Ok(Self { requirements })
    }

    fn parse_term(term: &str) -> Result<Requirement> {
        if let Some(key) = term.strip_prefix('!') {
            let key = key.trim();
            validate_key(key)?;
            return Ok(Requirement::NotExists(key.to_string()));
        }
        if let Some((key, value)) = term.split_once("!=") {
            let (key, value) = (key.trim(), value.trim());
            validate_key(key)?;
            validate_value(term, value)?;
            return Ok(Requirement::NotEquals(key.to_string(), value.to_string()));
        }
        if let Some((key, value)) = term.split_once('=') {
            // `==` and `=` are equivalent
            let (key, value) = (key.trim(), value.trim_start_matches('=').trim());
            validate_key(key)?;
            validate_value(term, value)?;
            return Ok(Requirement::Equals(key.to_string(), value.to_string()));
        }
        validate_key(term)?;
        Ok(Requirement::Exists(term.to_string()))
    }

    /// Evaluate this selector against a label map.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        })
    }

    /// True if this selector has no requirements (matches everything).
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("selector requirement has an empty key");
    }
    if key.contains(['=', '!', ',']) {
        bail!("selector key '{}' contains a reserved character", key);
    }
    Ok(())
}

fn validate_value(term: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        bail!("selector requirement '{}' has an empty value", term);
    }
    if value.contains(['=', '!', ',']) {
        bail!("selector value in '{}' contains a reserved character", term);
    }
    Ok(())
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self
            .requirements
            .iter()
            .map(|req| match req {
                Requirement::Equals(k, v) => format!("{}={}", k, v),
                Requirement::NotEquals(k, v) => format!("{}!={}", k, v),
                Requirement::Exists(k) => k.clone(),
                Requirement::NotExists(k) => format!("!{}", k),
            })
            .collect();
        write!(f, "{}", terms.join(","))
    }
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// Persisted as the expression string, not as a structure.
impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let expr = String::deserialize(deserializer)?;
        Selector::parse(&expr).map_err(serde::de::Error::custom)
    }
}
