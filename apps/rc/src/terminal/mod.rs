pub mod app;
pub mod attach;
pub mod cli;
pub mod error;
pub mod render;
