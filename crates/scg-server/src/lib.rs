pub mod client;
pub mod handlers;
pub mod registry;
pub mod relay;
pub mod server;

pub use client::{Client, ClientId, ClientRegistry};
pub use registry::{RegistryError, SessionRegistry};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
