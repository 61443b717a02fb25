//! Sharecast - social media connect for content sites
//!
//! This library connects platform accounts over OAuth, composes shares of
//! content entries, publishes them through a durable job queue exactly once
//! and imports recent platform posts.

pub mod config;
pub mod config_store;
pub mod db;
pub mod error;
pub mod http;
pub mod jobs;
pub mod linkify;
pub mod logging;
pub mod oauth;
pub mod opengraph;
pub mod providers;
pub mod service;
pub mod session;
pub mod types;
pub mod validation;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{Result, SharecastError};
pub use service::SharecastService;
pub use types::{Account, Entry, Post, ProviderRecord, Share, ShareContent, ShareState, Token};
