pub mod catalog;
pub mod config;
pub mod content;
pub mod dump;
pub mod import;
pub mod migrate;
pub mod runtime;
pub mod store;
pub mod unescape;
pub mod wordpress;
pub mod wpress;
