pub mod compression;
pub mod config;
pub mod env;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod templates;

// Re-export commonly used types for easier testing
pub use config::Config;
pub use error::StartupError;
pub use gateway::Gateway;
pub use server::http_server::HttpServer;
pub use server::request_handler::RequestHandler;
