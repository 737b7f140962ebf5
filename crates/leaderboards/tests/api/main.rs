mod helpers;
mod leaderboard_routes_test;
mod score_routes_test;
mod system_routes_test;
