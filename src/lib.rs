pub mod app;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod store;
