//! AppClass controller: HTTP API, configuration, and the file-backed source

pub mod api;
pub mod config;
pub mod source;
