// Infrastructure layer (shared components)
pub mod infrastructure;

// Re-export infrastructure modules
pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::postgres;

// Domain layer
pub mod admission;
pub mod registry;
pub mod store;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
