mod leaderboard_routes;

pub use leaderboard_routes::*;
