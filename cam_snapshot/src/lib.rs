//! Capture one still and have it analysed by the detect server.
pub mod client;
pub mod sensors;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
