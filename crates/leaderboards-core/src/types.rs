//! Leaderboard configuration and score types shared by the service and its stores

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{CompiledSchedule, CoreError};

/// Free-form string attributes attached to a score report
pub type Metadata = HashMap<String, String>;

/// How a new score combines with the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Accumulate every report
    Sum,
    /// Keep the highest score seen
    Max,
    /// Keep the lowest score seen
    Min,
    /// Keep the most recent score
    Last,
}

impl fmt::Display for AggregationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationPolicy::Sum => "sum",
            AggregationPolicy::Max => "max",
            AggregationPolicy::Min => "min",
            AggregationPolicy::Last => "last",
        };
        write!(f, "{}", name)
    }
}

/// When a leaderboard starts a new epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResetSchedule {
    /// Epoch only changes when an administrator persists a new value
    Manual {
        #[serde(default = "default_manual_epoch")]
        epoch: i64,
    },
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Custom {
        expression: String,
    },
}

fn default_manual_epoch() -> i64 {
    1
}

impl ResetSchedule {
    /// Cron expression backing this schedule, `None` for manual resets
    pub fn expression(&self) -> Option<&str> {
        match self {
            ResetSchedule::Manual { .. } => None,
            ResetSchedule::Hourly => Some("0 * * * *"),
            ResetSchedule::Daily => Some("0 0 * * *"),
            ResetSchedule::Weekly => Some("0 0 * * 7"),
            ResetSchedule::Monthly => Some("0 0 1 * *"),
            ResetSchedule::Custom { expression } => Some(expression.as_str()),
        }
    }
}

/// Closed set of supported segment dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    League,
    Country,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::League => "league",
            SegmentKind::Country => "country",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranked view partitioned by the value of one metadata field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDefinition {
    pub kind: SegmentKind,
    /// Metadata key holding the segment value
    pub field: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeTable {
    #[serde(default)]
    pub table: Vec<Prize>,
}

/// Carried with the configuration for downstream consumers; never evaluated here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prize {
    pub rank_from: u64,
    pub rank_to: u64,
    pub action: String,
}

/// Persisted configuration of one leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    pub name: String,
    #[serde(alias = "function")]
    pub policy: AggregationPolicy,
    pub reset: ResetSchedule,
    #[serde(default)]
    pub prizes: PrizeTable,
    #[serde(default)]
    pub segments: Vec<SegmentDefinition>,
}

/// A configuration paired with its compiled reset schedule
#[derive(Debug, Clone)]
pub struct Leaderboard {
    pub config: LeaderboardConfig,
    pub schedule: Arc<CompiledSchedule>,
}

impl Leaderboard {
    pub fn compile(config: LeaderboardConfig) -> Result<Self, CoreError> {
        let schedule = CompiledSchedule::compile(&config.reset)?;
        Ok(Self::with_schedule(config, Arc::new(schedule)))
    }

    /// Reuse an already compiled schedule, keeping its epoch cache warm
    pub fn with_schedule(config: LeaderboardConfig, schedule: Arc<CompiledSchedule>) -> Self {
        Self { config, schedule }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.config.policy
    }
}

/// Durable aggregate for one entry within one leaderboard epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub score: f64,
    pub update_counter: u64,
    pub metadata: Option<Metadata>,
}

/// Outcome of a conditional aggregate update; `applied == false` is a normal result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdateResult {
    pub new_score: f64,
    pub applied: bool,
    pub update_counter: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardEntry {
    pub entry_id: String,
    pub score: f64,
    /// 1-based, highest score first
    pub rank: u64,
}

/// Ordered entries of one named scoreboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardListing {
    pub name: String,
    pub scores: Vec<ScoreboardEntry>,
}
