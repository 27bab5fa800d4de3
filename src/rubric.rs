#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    config::Prompts,
    oracle::{Oracle, OracleRequest},
};

/// How a criterion is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "serde_json::Value")]
pub enum CriterionKind {
    /// Judged from the screenshot.
    #[default]
    Visual,
    /// Decided by selector presence in the DOM.
    Structural,
    /// Decided by simulated interaction.
    Behavioral,
}

impl From<serde_json::Value> for CriterionKind {
    fn from(value: serde_json::Value) -> Self {
        // null, numbers and anything unrecognised are left to visual judgment
        let Some(name) = value.as_str() else {
            return CriterionKind::Visual;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "structural" | "structure" | "dom" => CriterionKind::Structural,
            "behavioral" | "behavioural" | "behavior" | "interaction" => CriterionKind::Behavioral,
            _ => CriterionKind::Visual,
        }
    }
}

impl fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriterionKind::Visual => write!(f, "visual"),
            CriterionKind::Structural => write!(f, "structural"),
            CriterionKind::Behavioral => write!(f, "behavioral"),
        }
    }
}

/// Wire forms a check may take in the oracle's response.
#[derive(Deserialize)]
#[serde(untagged)]
enum CheckRepr {
    /// `"nav a"`
    Bare(String),
    /// `{ "selector": "nav a", "property": "color" }`
    Full {
        /// CSS selector.
        selector: String,
        /// CSS property compared by hover probes.
        #[serde(default)]
        property: Option<String>,
    },
}

/// A selector-based boolean probe attached to a criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CheckRepr")]
pub struct StructuralCheck {
    /// CSS selector that must match.
    selector: String,
    /// For behavioral checks, the computed style property expected to change
    /// on hover.
    #[serde(skip_serializing_if = "Option::is_none")]
    property: Option<String>,
}

impl From<CheckRepr> for StructuralCheck {
    fn from(value: CheckRepr) -> Self {
        match value {
            CheckRepr::Bare(selector) => Self {
                selector,
                property: None,
            },
            CheckRepr::Full { selector, property } => Self { selector, property },
        }
    }
}

impl StructuralCheck {
    /// Creates a presence check for `selector`.
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            property: None,
        }
    }

    /// Sets the style property compared by hover probes.
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Returns the selector.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Returns the hover property, if any.
    pub fn property(&self) -> Option<&str> {
        self.property.as_deref()
    }
}

/// One weighted rubric line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricCriterion {
    /// What is expected.
    description: String,
    /// Points available; always positive.
    #[serde(default = "default_weight", deserialize_with = "lenient_weight")]
    weight:      f64,
    /// How the criterion is decided.
    #[serde(default)]
    kind:        CriterionKind,
    /// Probes evaluated against the live page.
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    checks:      Vec<StructuralCheck>,
}

impl RubricCriterion {
    /// Creates a criterion without checks.
    pub fn new(description: impl Into<String>, weight: f64, kind: CriterionKind) -> Self {
        Self {
            description: description.into(),
            weight: if weight.is_finite() && weight > 0.0 { weight } else { 1.0 },
            kind,
            checks: Vec::new(),
        }
    }

    /// Adds a check.
    pub fn with_check(mut self, check: StructuralCheck) -> Self {
        self.checks.push(check);
        self
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Returns the kind.
    pub fn kind(&self) -> CriterionKind {
        self.kind
    }

    /// Returns the checks.
    pub fn checks(&self) -> &[StructuralCheck] {
        &self.checks
    }
}

/// Weight used when a line carries no usable annotation.
fn default_weight() -> f64 {
    1.0
}

/// Accepts `2`, `2.5`, `"2"` or `"2 pts"`; anything else, or a non-positive
/// value, becomes 1.
fn lenient_weight<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let weight = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .find(|token| !token.is_empty())
            .and_then(|token| token.parse::<f64>().ok()),
        _ => None,
    };
    Ok(weight.filter(|w| w.is_finite() && *w > 0.0).unwrap_or_else(default_weight))
}

/// Treats `null` like a missing list.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<StructuralCheck>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<StructuralCheck>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outcome of normalizing a rubric. Never an error: a failure leaves the
/// criteria empty so everything falls to visual judgment.
#[derive(Debug, Clone, Default)]
pub struct NormalizedRubric {
    /// The facilitator's rubric text, as given.
    source:   String,
    /// Criteria in rubric order.
    criteria: Vec<RubricCriterion>,
    /// Why normalization failed, if it did.
    failure:  Option<String>,
}

impl NormalizedRubric {
    /// Wraps already-structured criteria.
    pub fn from_criteria(source: impl Into<String>, criteria: Vec<RubricCriterion>) -> Self {
        Self {
            source: source.into(),
            criteria,
            failure: None,
        }
    }

    /// Records a failed normalization.
    pub fn failed(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source:   source.into(),
            criteria: Vec::new(),
            failure:  Some(reason.into()),
        }
    }

    /// Returns the rubric text the criteria were derived from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the criteria.
    pub fn criteria(&self) -> &[RubricCriterion] {
        &self.criteria
    }

    /// Returns the normalization failure, if any.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Sum of all weights.
    pub fn max_score(&self) -> f64 {
        self.criteria.iter().map(RubricCriterion::weight).sum()
    }
}

/// Removes an informal fence (```` ```json ````, `'''`, `~~~`) around a
/// payload, plus any prose before the first `[` or after the last `]`.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();

    for fence in ["```", "'''", "~~~"] {
        if let Some(rest) = text.strip_prefix(fence) {
            // drop the info string (`json`, `JSON`, ...) on the opening line
            text = match rest.split_once('\n') {
                Some((_, body)) => body,
                None => rest,
            };
            text = text.trim_end();
            text = text.strip_suffix(fence).unwrap_or(text).trim();
            break;
        }
    }

    if !(text.starts_with('[') && text.ends_with(']'))
        && let (Some(start), Some(end)) = (text.find('['), text.rfind(']'))
        && start < end
    {
        text = &text[start..=end];
    }

    text
}

/// Parses the oracle's criteria payload.
pub fn parse_criteria(raw: &str) -> Result<Vec<RubricCriterion>> {
    let payload = strip_code_fence(raw);
    if payload.is_empty() {
        bail!("Oracle returned an empty rubric payload");
    }
    serde_json::from_str::<Vec<RubricCriterion>>(payload)
        .context("Oracle rubric payload is not a criteria array")
}

/// Turns facilitator-authored rubric text into typed, weighted criteria.
///
/// Oracle failures and unparseable payloads are absorbed here and recorded as
/// a normalization failure.
pub async fn normalize(
    oracle: &dyn Oracle,
    rubric_text: &str,
    prompts: &Prompts,
) -> NormalizedRubric {
    let rubric_text = rubric_text.trim();
    if rubric_text.is_empty() {
        tracing::warn!("Rubric is empty; nothing to normalize");
        return NormalizedRubric::failed(rubric_text, "Rubric text is empty");
    }

    let request = OracleRequest::builder()
        .system(prompts.rubric_system())
        .text(format!("Rubric:\n{rubric_text}"))
        .build();

    let response = match oracle.complete(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Rubric normalization request failed: {e:#}");
            return NormalizedRubric::failed(rubric_text, format!(
                "Rubric normalization request failed: {e:#}"
            ));
        }
    };

    match parse_criteria(&response) {
        Ok(criteria) => {
            tracing::info!("Rubric normalized into {} criteria", criteria.len());
            NormalizedRubric::from_criteria(rubric_text, criteria)
        }
        Err(e) => {
            tracing::warn!(
                "Could not parse normalized rubric, falling back to visual judgment: {e:#}"
            );
            NormalizedRubric::failed(rubric_text, format!("{e:#}"))
        }
    }
}
