//! Store-agnostic conditional updates.
//!
//! Each aggregation policy is expressed as an [`UpdateRequest`]: how to change the score,
//! which metadata to attach and an optional [`Condition`] guarding the write. Stores compile
//! the condition into their native syntax; the in-memory store evaluates it directly with
//! [`Condition::evaluate`].

use serde::{Deserialize, Serialize};

use crate::{AggregateRecord, Metadata};

/// A field of the stored aggregate a condition can inspect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Score,
    Metadata(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    /// `attribute <op> operand`
    pub fn holds<T: PartialOrd>(&self, attribute: &T, operand: &T) -> bool {
        match self {
            Comparison::Eq => attribute == operand,
            Comparison::Lt => attribute < operand,
            Comparison::Le => attribute <= operand,
            Comparison::Gt => attribute > operand,
            Comparison::Ge => attribute >= operand,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Exists(Attribute),
    NotExists(Attribute),
    Compare(Attribute, Comparison, Operand),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn score(comparison: Comparison, value: f64) -> Self {
        Condition::Compare(Attribute::Score, comparison, Operand::Number(value))
    }

    pub fn metadata_equals(key: &str, value: &str) -> Self {
        Condition::Compare(
            Attribute::Metadata(key.to_string()),
            Comparison::Eq,
            Operand::Text(value.to_string()),
        )
    }

    /// Evaluate against the currently stored record, `None` when there is none yet.
    /// Comparisons against a missing attribute, or across types, are false.
    pub fn evaluate(&self, record: Option<&AggregateRecord>) -> bool {
        match self {
            Condition::Exists(attribute) => attribute_present(attribute, record),
            Condition::NotExists(attribute) => !attribute_present(attribute, record),
            Condition::Compare(attribute, comparison, operand) => {
                match (attribute, operand, record) {
                    (Attribute::Score, Operand::Number(value), Some(record)) => {
                        comparison.holds(&record.score, value)
                    }
                    (Attribute::Metadata(key), Operand::Text(value), Some(record)) => record
                        .metadata
                        .as_ref()
                        .and_then(|metadata| metadata.get(key))
                        .is_some_and(|stored| comparison.holds(stored, value)),
                    _ => false,
                }
            }
            Condition::And(conditions) => conditions.iter().all(|c| c.evaluate(record)),
            Condition::Or(conditions) => conditions.iter().any(|c| c.evaluate(record)),
        }
    }
}

fn attribute_present(attribute: &Attribute, record: Option<&AggregateRecord>) -> bool {
    match (attribute, record) {
        (_, None) => false,
        (Attribute::Score, Some(_)) => true,
        (Attribute::Metadata(key), Some(record)) => record
            .metadata
            .as_ref()
            .is_some_and(|metadata| metadata.contains_key(key)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreAssignment {
    /// Add to the stored score (starting from zero)
    Add(f64),
    /// Replace the stored score
    Set(f64),
}

impl ScoreAssignment {
    pub fn apply(&self, stored: Option<f64>) -> f64 {
        match self {
            ScoreAssignment::Add(delta) => stored.unwrap_or(0.0) + delta,
            ScoreAssignment::Set(value) => *value,
        }
    }
}

/// A conditional write against one aggregate record.
///
/// When applied the counter is incremented and every supplied metadata key is set on the
/// stored metadata. Stored keys the request does not mention are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub score: ScoreAssignment,
    pub metadata: Option<Metadata>,
    pub condition: Option<Condition>,
    /// Replays carrying the same key return the first recorded result
    pub idempotency_key: Option<String>,
}

impl UpdateRequest {
    pub fn is_allowed(&self, record: Option<&AggregateRecord>) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |condition| condition.evaluate(record))
    }

    /// The record that results from applying this request on top of `record`
    pub fn apply_to(&self, record: Option<&AggregateRecord>) -> AggregateRecord {
        let mut metadata = record.and_then(|r| r.metadata.clone());
        if let Some(supplied) = &self.metadata {
            let merged = metadata.get_or_insert_with(Metadata::new);
            for (key, value) in supplied {
                merged.insert(key.clone(), value.clone());
            }
        }

        AggregateRecord {
            score: self.score.apply(record.map(|r| r.score)),
            update_counter: record.map_or(0, |r| r.update_counter) + 1,
            metadata,
        }
    }
}
