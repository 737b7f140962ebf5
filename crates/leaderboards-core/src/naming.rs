//! Epoch-qualified scoreboard names. All names are lower-cased.

use crate::{Metadata, SegmentDefinition, SegmentKind};

/// `{leaderboard}::{epoch}`
pub fn epoch_name(leaderboard: &str, epoch: i64) -> String {
    format!("{}::{}", leaderboard, epoch).to_lowercase()
}

/// `{leaderboard}::{kind}::{value}::{epoch}`
pub fn segment_name(leaderboard: &str, kind: SegmentKind, value: &str, epoch: i64) -> String {
    format!("{}::{}::{}::{}", leaderboard, kind, value, epoch).to_lowercase()
}

/// Names of the segment scoreboards selected by `metadata`, in configuration order.
/// Segments whose source field is missing or empty are skipped.
pub fn segment_names(
    leaderboard: &str,
    segments: &[SegmentDefinition],
    metadata: Option<&Metadata>,
    epoch: i64,
) -> Vec<String> {
    let Some(metadata) = metadata else {
        return vec![];
    };
    segments
        .iter()
        .filter_map(|segment| {
            metadata
                .get(&segment.field)
                .filter(|value| !value.is_empty())
                .map(|value| segment_name(leaderboard, segment.kind, value, epoch))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn test_names_are_lowercase() {
        assert_eq!(epoch_name("Weekly-Race", 2844), "weekly-race::2844");
        assert_eq!(
            segment_name("Weekly-Race", SegmentKind::Country, "PT", 2844),
            "weekly-race::country::pt::2844"
        );
    }

    #[test]
    fn test_segment_names_skip_missing_fields() {
        let segments = vec![
            SegmentDefinition {
                kind: SegmentKind::League,
                field: "league".into(),
            },
            SegmentDefinition {
                kind: SegmentKind::Country,
                field: "country".into(),
            },
        ];
        let metadata = hashmap! { "country".to_string() => "UK".to_string() };

        assert_eq!(
            segment_names("cup", &segments, Some(&metadata), 3),
            vec!["cup::country::uk::3".to_string()]
        );
        assert!(segment_names("cup", &segments, None, 3).is_empty());
    }
}
