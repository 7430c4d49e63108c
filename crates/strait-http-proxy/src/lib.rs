// Library exports for integration testing and embedding.

pub mod auth;
pub mod config;
pub mod hooks;
pub mod proxy;
