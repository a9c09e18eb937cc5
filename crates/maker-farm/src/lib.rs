/*
[INPUT]:  Public API exports for the maker-farm crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod band;
pub mod config;
pub mod events;
pub mod feed;
pub mod order_manager;
pub mod price;
pub mod safety;
pub mod stats;
pub mod strategy;
pub mod task;
pub mod venue;

// Re-export main types for convenience
pub use config::FarmConfig;
pub use events::EngineEvent;
pub use feed::PriceFeed;
pub use strategy::MakerFarmingStrategy;
pub use task::{TaskManager, TaskReport};
