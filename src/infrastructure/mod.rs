// Infrastructure module - Sockets, configuration files and logging
pub mod config;
pub mod logging;
pub mod tcp;
