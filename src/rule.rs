//! Mock rules and the rule matcher
//!
//! A rule is matched against a [`RequestDescriptor`] built from the
//! intercepted call. Matching is pure: no rule state is cached between
//! calls, so edits to the rule list apply to the next request.

use std::collections::BTreeMap;
use std::time::Duration;

use fancy_regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{InterceptError, Result};

/// Upper bound for `delayMs`
pub const MAX_DELAY_MS: u64 = 10_000;

/// Methods whose requests may carry a body override
const BODY_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// A single mock rule, serialized the way the extension UI stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub url_pattern: String,
    /// Treat `url_pattern` as a regular expression
    #[serde(default)]
    pub is_reg_exp: bool,
    /// Empty matches any method
    #[serde(default)]
    pub method: String,
    pub enabled: bool,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<BTreeMap<String, String>>,
    /// `None` passes the real body through
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, String>>,
    #[serde(default, deserialize_with = "loose_status")]
    pub status_code: Option<u16>,
    #[serde(default, deserialize_with = "loose_delay")]
    pub delay_ms: Option<i64>,
    #[serde(default)]
    pub date: String,
}

/// A number field as the UI may send it: fractional, numeric text, or
/// something unusable.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(f64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

impl LooseNumber {
    fn value(self) -> Option<f64> {
        let value = match self {
            LooseNumber::Number(n) => n,
            LooseNumber::Text(text) => text.trim().parse().ok()?,
            LooseNumber::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

fn loose_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<f64>, D::Error> {
    Ok(Option::<LooseNumber>::deserialize(deserializer)?.and_then(LooseNumber::value))
}

/// Truncated like the `Response` constructor does; out of range reads as unset
fn loose_status<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u16>, D::Error> {
    Ok(loose_number(deserializer)?
        .map(f64::trunc)
        .filter(|n| (0.0..=f64::from(u16::MAX)).contains(n))
        .map(|n| n as u16))
}

/// Truncated to whole milliseconds; negative values clamp later
fn loose_delay<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(loose_number(deserializer)?.map(|n| n.trunc() as i64))
}

/// What the matcher sees of an outgoing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
}

impl RequestDescriptor {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

impl Rule {
    /// Whether this rule applies to `request`.
    ///
    /// Disabled rules and rules without a pattern never match. An invalid
    /// regular expression never matches either.
    pub fn matches(&self, request: &RequestDescriptor) -> bool {
        if !self.enabled || self.url_pattern.is_empty() {
            return false;
        }
        self.url_matches(&request.url) && self.method_matches(&request.method)
    }

    fn url_matches(&self, url: &str) -> bool {
        if !self.is_reg_exp {
            return url.contains(&self.url_pattern);
        }
        let re = match self.compile_pattern() {
            Ok(re) => re,
            Err(e) => {
                log::debug!("rule {}: {}", self.id, e);
                return false;
            }
        };
        re.is_match(url).unwrap_or_else(|e| {
            log::debug!("rule {}: giving up on {}: {}", self.id, url, e);
            false
        })
    }

    fn method_matches(&self, method: &str) -> bool {
        self.method.is_empty() || self.method.eq_ignore_ascii_case(method)
    }

    /// Compile `url_pattern` as a regular expression
    pub fn compile_pattern(&self) -> Result<Regex> {
        Regex::new(&self.url_pattern).map_err(|e| InterceptError::InvalidPattern {
            pattern: self.url_pattern.clone(),
            reason: e.to_string(),
        })
    }

    /// The body to send instead of the caller's, if this rule rewrites
    /// requests made with `method`.
    pub fn request_body_for(&self, method: &str) -> Option<&str> {
        match &self.request_body {
            Some(body) if method_supports_request_body(method) => Some(body.as_str()),
            _ => None,
        }
    }

    /// Response delay clamped to `[0, max_ms]`
    pub fn delay(&self, max_ms: u64) -> Option<Duration> {
        self.delay_ms.map(|ms| clamp_delay(ms, max_ms))
    }
}

/// First rule in list order that matches `request`.
///
/// List order is priority order; later rules are never consulted once one
/// matches.
pub fn find_matching_rule<'a>(rules: &'a [Rule], request: &RequestDescriptor) -> Option<&'a Rule> {
    rules.iter().find(|rule| rule.matches(request))
}

/// POST, PUT, PATCH and DELETE, case-insensitive
pub fn method_supports_request_body(method: &str) -> bool {
    BODY_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

pub fn clamp_delay(delay_ms: i64, max_ms: u64) -> Duration {
    Duration::from_millis((delay_ms.max(0) as u64).min(max_ms))
}

/// Loosely-typed rule as produced by the import and edit forms.
///
/// [`RuleInput::into_rule`] fills in what a stored [`Rule`] must carry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInput {
    #[serde(default)]
    pub id: Option<String>,
    pub url_pattern: String,
    #[serde(default)]
    pub is_reg_exp: Option<bool>,
    pub method: String,
    pub enabled: bool,
    pub status_code: i64,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default, deserialize_with = "loose_delay")]
    pub delay_ms: Option<i64>,
}

impl RuleInput {
    pub fn into_rule(self) -> Result<Rule> {
        let status_code = u16::try_from(self.status_code).map_err(|_| {
            InterceptError::InvalidRule(format!("status code {} out of range", self.status_code))
        })?;
        Ok(Rule {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            url_pattern: self.url_pattern,
            is_reg_exp: self.is_reg_exp.unwrap_or(false),
            method: self.method,
            enabled: self.enabled,
            request_body: self.request_body.filter(|body| !body.trim().is_empty()),
            request_headers: None,
            response: self.response,
            response_headers: None,
            status_code: Some(status_code),
            delay_ms: self.delay_ms,
            date: self
                .date
                .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string()),
        })
    }
}

/// Parse an exported rule list, normalizing each entry
pub fn parse_rules(json: &str) -> Result<Vec<Rule>> {
    let inputs: Vec<RuleInput> = serde_json::from_str(json)?;
    inputs.into_iter().map(RuleInput::into_rule).collect()
}

#[cfg(test)]
pub(crate) fn rule(id: &str, url_pattern: &str, method: &str) -> Rule {
    Rule {
        id: id.to_string(),
        url_pattern: url_pattern.to_string(),
        is_reg_exp: false,
        method: method.to_string(),
        enabled: true,
        request_body: None,
        request_headers: None,
        response: None,
        response_headers: None,
        status_code: Some(200),
        delay_ms: None,
        date: String::new(),
    }
}
