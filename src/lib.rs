pub mod config;
pub mod data;
pub mod error;
pub mod judge;
pub mod model;
pub mod progress;
pub mod session;

pub use data::Catalog;
pub use judge::{Judge, Verdict};
pub use progress::ProgressionStore;
pub use session::SessionOrchestrator;
