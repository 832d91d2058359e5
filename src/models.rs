//! Domain records: products, per-platform listings and sales

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marketplaces the sync engine knows how to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Marktplaats,
    Vinted,
    Depop,
    FacebookMarketplace,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Marktplaats,
        Platform::Vinted,
        Platform::Depop,
        Platform::FacebookMarketplace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Marktplaats => "marktplaats",
            Platform::Vinted => "vinted",
            Platform::Depop => "depop",
            Platform::FacebookMarketplace => "facebook_marketplace",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "marktplaats" => Ok(Platform::Marktplaats),
            "vinted" => Ok(Platform::Vinted),
            "depop" => Ok(Platform::Depop),
            "facebook_marketplace" => Ok(Platform::FacebookMarketplace),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Lifecycle state of a canonical product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Sold,
    Pending,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Sold => "sold",
            ProductStatus::Pending => "pending",
            ProductStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProductStatus::Active),
            "sold" => Ok(ProductStatus::Sold),
            "pending" => Ok(ProductStatus::Pending),
            "inactive" => Ok(ProductStatus::Inactive),
            other => Err(format!("unknown product status: {}", other)),
        }
    }
}

/// State of the listing on the remote platform.
///
/// `Sold` and `Deleted` are terminal: rows reaching them are kept for the
/// audit trail and never purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Active,
    Sold,
    Deleted,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Active => "active",
            RemoteStatus::Sold => "sold",
            RemoteStatus::Deleted => "deleted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteStatus::Sold | RemoteStatus::Deleted)
    }
}

impl FromStr for RemoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RemoteStatus::Active),
            "sold" => Ok(RemoteStatus::Sold),
            "deleted" => Ok(RemoteStatus::Deleted),
            other => Err(format!("unknown remote status: {}", other)),
        }
    }
}

/// Ledger sync state for one (product, platform) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(format!("unknown sync status: {}", other)),
        }
    }
}

/// Canonical product record, owned by the local store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub price: f64,
    /// Image URLs, stored as a JSON array in SQLite
    pub images: Vec<String>,
    pub category: Option<String>,
    pub size: Option<String>,
    pub condition: Option<String>,
    pub brand: Option<String>,
    pub color: Option<String>,
    pub status: ProductStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields accepted when creating a product locally (id and timestamps are
/// assigned by the store)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub images: Vec<String>,
    pub category: Option<String>,
    pub size: Option<String>,
    pub condition: Option<String>,
    pub brand: Option<String>,
    pub color: Option<String>,
}

/// Ledger row: sync state of one product on one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformListing {
    pub id: i64,
    pub product_id: i64,
    pub platform: Platform,
    /// Listing id assigned by the platform; absent until a create succeeds
    pub external_id: Option<String>,
    pub listing_url: Option<String>,
    pub remote_status: RemoteStatus,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub last_synced_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A detected sale. Immutable once recorded, except for the accounting-sync
/// fields which the retry sweep flips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: i64,
    pub product_id: i64,
    pub platform: Platform,
    pub sale_price: f64,
    pub shipping_cost: f64,
    pub platform_fee: f64,
    pub payment_fee: f64,
    pub net_profit: f64,
    pub sale_date: String,
    pub synced_to_sheets: bool,
    pub sheets_row_number: Option<i64>,
    pub created_at: String,
}

/// Sale data as detected, before the store assigns an id
#[derive(Debug, Clone)]
pub struct NewSale {
    pub product_id: i64,
    pub platform: Platform,
    pub sale_price: f64,
    pub shipping_cost: f64,
    pub platform_fee: f64,
    pub payment_fee: f64,
    pub sale_date: String,
}

impl NewSale {
    /// Sale detected via CheckSold: only the price is known, fees come in
    /// later by hand if at all.
    pub fn detected(product_id: i64, platform: Platform, sale_price: f64, sale_date: String) -> Self {
        Self {
            product_id,
            platform,
            sale_price,
            shipping_cost: 0.0,
            platform_fee: 0.0,
            payment_fee: 0.0,
            sale_date,
        }
    }

    /// Net profit after fees and an optional acquisition cost
    pub fn net_profit(&self, original_cost: f64) -> f64 {
        self.sale_price - self.shipping_cost - self.platform_fee - self.payment_fee - original_cost
    }
}
