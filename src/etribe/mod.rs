//! ETribe API integration.

pub mod cached_client;
pub mod client;
pub mod resources;
pub mod types;

pub use cached_client::EtribeClient;
pub use client::{ApiClient, Transport};
pub use resources::ResourceKey;
