//! Listing Sync - Multi-Platform Resale Synchronization
//!
//! Keeps one canonical product store in agreement with listings on several
//! marketplaces: imports existing listings, cross-posts new ones, detects
//! sales and closes out sibling listings, and mirrors sales into an
//! accounting spreadsheet.

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod platforms;
pub mod sales;
pub mod sheets;
pub mod sync;
pub mod web;

pub use config::Settings;
pub use database::init_schema;
pub use error::{Result, SyncError};
pub use models::{Platform, PlatformListing, Product, Sale};
pub use sync::SyncOrchestrator;
