// Public API for integration tests and potential library usage

pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;
