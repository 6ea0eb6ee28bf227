pub mod config;
pub mod forward;
pub mod logger;
pub mod resolver;
