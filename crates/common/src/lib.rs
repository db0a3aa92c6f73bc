pub mod error;
pub mod model;
pub mod preferences;
pub mod sse;
pub mod xml;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
