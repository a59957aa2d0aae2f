//! # Label Selectors
//!
//! Evaluates a `metav1.LabelSelector` against an object's labels.
//!
//! `matchLabels` and `matchExpressions` are ANDed together. An absent or
//! empty selector matches everything.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("label selector key must not be empty")]
    EmptyKey,
    #[error("unknown label selector operator {operator:?} for key {key:?}")]
    UnknownOperator { key: String, operator: String },
    #[error("label selector operator {operator} for key {key:?} requires at least one value")]
    MissingValues { key: String, operator: &'static str },
    #[error("label selector operator {operator} for key {key:?} does not take values")]
    UnexpectedValues { key: String, operator: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operator {
    Equals(String),
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    operator: Operator,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match &self.operator {
            Operator::Equals(expected) => value == Some(expected),
            Operator::In(values) => value.is_some_and(|v| values.contains(v)),
            Operator::NotIn(values) => value.is_none_or(|v| !values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// A parsed, validated label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selector matching every object
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parse an optional `LabelSelector`; `None` selects everything
    ///
    /// # Errors
    ///
    /// Returns an error for unknown operators, empty keys, and value lists
    /// that do not fit their operator.
    pub fn parse(selector: Option<&LabelSelector>) -> Result<Self, SelectorError> {
        let Some(selector) = selector else {
            return Ok(Self::everything());
        };

        let mut requirements = Vec::new();

        for (key, value) in selector.match_labels.iter().flatten() {
            if key.is_empty() {
                return Err(SelectorError::EmptyKey);
            }
            requirements.push(Requirement {
                key: key.clone(),
                operator: Operator::Equals(value.clone()),
            });
        }

        for expression in selector.match_expressions.iter().flatten() {
            let key = expression.key.clone();
            if key.is_empty() {
                return Err(SelectorError::EmptyKey);
            }
            let values: BTreeSet<String> = expression.values.iter().flatten().cloned().collect();
            let operator = match expression.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return Err(SelectorError::MissingValues {
                        key,
                        operator: if expression.operator == "In" { "In" } else { "NotIn" },
                    });
                }
                "In" => Operator::In(values),
                "NotIn" => Operator::NotIn(values),
                "Exists" | "DoesNotExist" if !values.is_empty() => {
                    return Err(SelectorError::UnexpectedValues {
                        key,
                        operator: if expression.operator == "Exists" {
                            "Exists"
                        } else {
                            "DoesNotExist"
                        },
                    });
                }
                "Exists" => Operator::Exists,
                "DoesNotExist" => Operator::DoesNotExist,
                other => {
                    return Err(SelectorError::UnknownOperator {
                        key,
                        operator: other.to_string(),
                    });
                }
            };
            requirements.push(Requirement { key, operator });
        }

        Ok(Self { requirements })
    }

    /// Whether `labels` satisfy every requirement
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    #[must_use]
    pub fn matches_everything(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|r| {
                let join = |values: &BTreeSet<String>| {
                    values.iter().cloned().collect::<Vec<_>>().join(",")
                };
                match &r.operator {
                    Operator::Equals(v) => format!("{}={v}", r.key),
                    Operator::In(vs) => format!("{} in ({})", r.key, join(vs)),
                    Operator::NotIn(vs) => format!("{} notin ({})", r.key, join(vs)),
                    Operator::Exists => r.key.clone(),
                    Operator::DoesNotExist => format!("!{}", r.key),
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}
