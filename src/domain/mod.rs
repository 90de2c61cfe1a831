// Domain module - Core types shared by client and server
pub mod config;
pub mod endpoint;
pub mod error;
