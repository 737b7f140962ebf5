mod score_routes;

pub use score_routes::*;
