//! Input validation shared by the HTTP layer and the configuration admin path

use crate::{CoreError, LeaderboardConfig, Metadata};

const MAX_NAME_LEN: usize = 128;

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Leaderboard names and entry ids end up inside `::`-separated scoreboard names
pub fn validate_name(kind: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{} cannot be empty", kind)));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "{} longer than {} characters",
            kind, MAX_NAME_LEN
        )));
    }
    if value.contains("::") {
        return Err(CoreError::Validation(format!(
            "{} cannot contain '::'",
            kind
        )));
    }
    Ok(())
}

pub fn validate_score(score: f64) -> Result<(), CoreError> {
    if !score.is_finite() {
        return Err(CoreError::Validation("score must be a finite number".into()));
    }
    Ok(())
}

pub fn validate_metadata(metadata: &Metadata) -> Result<(), CoreError> {
    for (key, value) in metadata {
        if !is_identifier(key) {
            return Err(CoreError::Validation(format!(
                "invalid metadata key '{}'",
                key
            )));
        }
        if value.contains("::") {
            return Err(CoreError::Validation(format!(
                "metadata value for '{}' cannot contain '::'",
                key
            )));
        }
    }
    Ok(())
}

/// Structural checks on a configuration; the schedule is checked by compiling it
pub fn validate_config(config: &LeaderboardConfig) -> Result<(), CoreError> {
    validate_name("leaderboard name", &config.name)?;
    if !is_identifier(&config.name) {
        return Err(CoreError::Validation(format!(
            "leaderboard name '{}' may only contain letters, digits, '_' and '-'",
            config.name
        )));
    }

    for segment in &config.segments {
        if !is_identifier(&segment.field) {
            return Err(CoreError::Validation(format!(
                "invalid segment field '{}'",
                segment.field
            )));
        }
    }
    if config
        .segments
        .iter()
        .enumerate()
        .any(|(i, s)| config.segments[..i].iter().any(|other| other.kind == s.kind))
    {
        return Err(CoreError::Validation(
            "each segment kind may be configured once".into(),
        ));
    }

    for prize in &config.prizes.table {
        if prize.rank_from == 0 || prize.rank_from > prize.rank_to {
            return Err(CoreError::Validation(format!(
                "invalid prize rank range {}-{}",
                prize.rank_from, prize.rank_to
            )));
        }
    }

    Ok(())
}
