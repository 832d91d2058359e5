//! Marketplace adapters
//!
//! One adapter per platform behind a uniform capability set. Adapters are
//! the only code that knows platform endpoints and payload shapes; the
//! orchestrator sees nothing but this trait. Every adapter applies a
//! request timeout and reports it as an error, never a hang.

mod depop;
mod facebook;
mod marktplaats;
mod vinted;

pub use depop::DepopAdapter;
pub use facebook::FacebookAdapter;
pub use marktplaats::MarktplaatsAdapter;
pub use vinted::VintedAdapter;

use crate::config::Settings;
use crate::error::Result;
use crate::models::{Platform, Product, RemoteStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A listing as the platform reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteListing {
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub url: Option<String>,
    pub status: RemoteStatus,
    #[serde(default)]
    pub images: Vec<String>,
    pub category: Option<String>,
    pub size: Option<String>,
    pub condition: Option<String>,
    pub brand: Option<String>,
}

/// A sale event from a platform's sales feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSale {
    /// External id of the listing that sold
    pub external_id: String,
    pub sale_price: Option<f64>,
    pub sold_at: Option<String>,
}

/// Which signal an adapter uses to detect sales.
///
/// The two are not equivalent on every platform, so each adapter commits to
/// exactly one and CheckSold reads only that one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoldSignal {
    /// Poll `check_listing_status` per listing
    ListingStatus,
    /// Read `fetch_sales` once and match external ids
    SalesFeed,
}

/// Uniform capability set the orchestrator drives.
///
/// Each call may fail independently; failures are per-platform and must not
/// abort work on sibling platforms.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Establish a usable session. Failure disables this platform for the
    /// current operation only.
    async fn authenticate(&self) -> Result<()>;

    /// All listings currently visible on the seller's account
    async fn list_listings(&self) -> Result<Vec<RemoteListing>>;

    /// Publish a product, returning the platform's listing id
    async fn create_listing(&self, product: &Product) -> Result<String>;

    /// Push changed product fields to an existing listing
    async fn update_listing(&self, external_id: &str, product: &Product) -> Result<()>;

    /// Remove a listing from the platform
    async fn delete_listing(&self, external_id: &str) -> Result<()>;

    /// Mark a listing sold on the platform
    async fn mark_as_sold(&self, external_id: &str) -> Result<()>;

    /// Current remote state of one listing
    async fn check_listing_status(&self, external_id: &str) -> Result<RemoteStatus>;

    /// The platform's sales feed
    async fn fetch_sales(&self) -> Result<Vec<RemoteSale>>;

    /// The sold-detection signal this adapter commits to
    fn sold_signal(&self) -> SoldSignal;
}

/// Build the adapter set for every platform with credentials configured,
/// in the fixed order the orchestrator will process them.
pub fn adapters_from_settings(settings: &Settings) -> Vec<Arc<dyn PlatformAdapter>> {
    let mut adapters: Vec<Arc<dyn PlatformAdapter>> = Vec::new();

    if settings.marktplaats.access_token.is_some() {
        adapters.push(Arc::new(MarktplaatsAdapter::new(
            &settings.marktplaats,
            settings.request_timeout_secs,
        )));
    }
    if settings.vinted.is_configured() {
        adapters.push(Arc::new(VintedAdapter::new(
            &settings.vinted,
            settings.request_timeout_secs,
        )));
    }
    if settings.depop.is_configured() {
        adapters.push(Arc::new(DepopAdapter::new(
            &settings.depop,
            settings.request_timeout_secs,
        )));
    }
    if settings.facebook.is_configured() {
        adapters.push(Arc::new(FacebookAdapter::new(
            &settings.facebook,
            settings.request_timeout_secs,
        )));
    }

    log::info!(
        "Configured adapters: [{}]",
        adapters
            .iter()
            .map(|a| a.platform().as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    adapters
}
