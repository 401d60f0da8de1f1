pub mod channels;

pub use channels::{AccountResponse, HealthResponse, SessionResponse};
