pub mod audit;
pub mod config;
pub mod context;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod orchestrator;
pub mod prd;
pub mod project_config;
pub mod signals;
pub mod tracker;
pub mod ui;
pub mod util;
