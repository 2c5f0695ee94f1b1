pub mod config;
pub mod error;
pub mod fanout;
pub mod forwarder;
pub mod signal;
pub mod verifier;
pub mod worker;
