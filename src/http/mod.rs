//! HTTP surface: caller identification, admission middleware and server.

mod client;
mod middleware;
mod server;

pub use client::{extract_client_address, extract_token, UNKNOWN_ADDRESS};
pub use middleware::{enforce_admission, AdmissionState};
pub use server::{router, HttpServer};
