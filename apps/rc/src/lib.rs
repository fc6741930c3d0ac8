pub mod api;
pub mod config;
pub mod cursor;
pub mod input;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod terminal;
pub mod timeline;
