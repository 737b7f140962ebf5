//! Aggregation policies expressed as conditional update requests

use crate::{
    AggregationPolicy, Attribute, Comparison, Condition, Metadata, ScoreAssignment, UpdateRequest,
};

/// Build the conditional write that applies `value` under `policy`.
///
/// Sum always applies and never checks metadata. Max and Min only apply when the new value
/// does not lose against the stored one (or nothing is stored yet); Last always overwrites.
/// For Max, Min and Last every supplied metadata key must be absent from the stored record
/// or hold the same value. Metadata values are lower-cased first, the same way segment
/// names are, so `PT` and `pt` select one segment and never conflict.
pub fn update_request(
    policy: AggregationPolicy,
    value: f64,
    metadata: Option<&Metadata>,
    idempotency_key: Option<String>,
) -> UpdateRequest {
    let metadata: Option<Metadata> = metadata.filter(|m| !m.is_empty()).map(|m| {
        m.iter()
            .map(|(key, value)| (key.clone(), value.to_lowercase()))
            .collect()
    });

    let (score, score_condition) = match policy {
        AggregationPolicy::Sum => (ScoreAssignment::Add(value), None),
        AggregationPolicy::Max => (
            ScoreAssignment::Set(value),
            Some(score_not_beaten(Comparison::Le, value)),
        ),
        AggregationPolicy::Min => (
            ScoreAssignment::Set(value),
            Some(score_not_beaten(Comparison::Ge, value)),
        ),
        AggregationPolicy::Last => (ScoreAssignment::Set(value), None),
    };

    let condition = match (policy, metadata.as_ref()) {
        (AggregationPolicy::Sum, _) | (_, None) => score_condition,
        (_, Some(metadata)) => {
            let mut clauses: Vec<Condition> = score_condition.into_iter().collect();
            clauses.extend(metadata_consistency(metadata));
            match clauses.len() {
                1 => clauses.pop(),
                _ => Some(Condition::And(clauses)),
            }
        }
    };

    UpdateRequest {
        score,
        metadata,
        condition,
        idempotency_key,
    }
}

/// stored `<op>` value, or no stored score
fn score_not_beaten(comparison: Comparison, value: f64) -> Condition {
    Condition::Or(vec![
        Condition::score(comparison, value),
        Condition::NotExists(Attribute::Score),
    ])
}

fn metadata_consistency(metadata: &Metadata) -> Vec<Condition> {
    // sorted so the compiled condition is stable across calls
    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| {
            Condition::Or(vec![
                Condition::NotExists(Attribute::Metadata(key.clone())),
                Condition::metadata_equals(key, &metadata[key]),
            ])
        })
        .collect()
}
