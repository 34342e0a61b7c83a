pub mod acquire;
pub mod cli;
pub mod config;
pub mod enrich;
pub mod interrupt;
pub mod limiter;
pub mod listing;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod store;
pub mod vin;
