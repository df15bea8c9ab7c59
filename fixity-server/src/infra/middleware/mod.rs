pub mod auth;
pub mod client_ip;

pub use auth::{auth_middleware, extract_bearer_token};
pub use client_ip::ClientIp;
