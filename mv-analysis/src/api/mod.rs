//! HTTP and WebSocket API handlers

pub mod analysis;
pub mod health;
pub mod reports;
pub mod ws;

pub use analysis::analysis_routes;
pub use health::health_routes;
pub use reports::report_routes;
pub use ws::ws_routes;
