pub mod config;
pub mod error;
pub mod http_client;
pub mod providers;
pub mod routing;
pub mod server;
