//! leaderboards-core: schedules, epochs and aggregation rules for the leaderboards service
//!
//! Everything in this crate is pure computation. Stores, transports and background tasks
//! live in the `leaderboards` crate and consume these types.

pub mod condition;
pub mod cron;
pub mod errors;
pub mod naming;
pub mod policy;
pub mod schedule;
pub mod types;
pub mod validation;

pub use condition::*;
pub use cron::CronExpression;
pub use errors::*;
pub use naming::*;
pub use policy::*;
pub use schedule::*;
pub use types::*;
pub use validation::*;
