pub mod config;
pub mod executor;
pub mod model;
pub mod resilience;
pub mod scan;
pub mod traits;

// Re-export common types for convenience
pub use config::*;
pub use executor::*;
pub use model::*;
pub use resilience::*;
pub use scan::*;
pub use traits::*;
