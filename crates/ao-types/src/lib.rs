pub mod bounds;
pub mod config;
pub mod errors;
pub mod family;
pub mod params;
pub mod performance;

pub use bounds::*;
pub use config::*;
pub use errors::*;
pub use family::*;
pub use params::*;
pub use performance::*;
