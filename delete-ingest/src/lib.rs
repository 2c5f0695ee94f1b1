pub mod api;
pub mod config;
pub mod dedup;
pub mod endpoint;
pub mod gateway;
pub mod prometheus;
pub mod router;
pub mod server;
pub mod time;
