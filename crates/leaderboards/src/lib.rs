pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod startup;

pub use api::routes::*;
pub use config::*;
pub use domain::{Error as LeaderboardsError, LeaderboardService, ScoreReport};
pub use infra::db::*;
pub use startup::*;
