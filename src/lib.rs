pub mod api;
pub mod app;
pub mod audio;
pub mod cli;
pub mod client;
pub mod config;
pub mod global;
pub mod notify;
pub mod session;
