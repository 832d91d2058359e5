//! Sync orchestrator
//!
//! Drives reconciliation between the canonical product store and the
//! platform adapters: import, cross-post, sold detection and full re-sync.
//! Platforms are processed in the fixed order the adapter list was built
//! in; one platform failing never aborts work on its siblings. Adapter
//! errors land on the affected ledger row; only storage failures escape an
//! operation as an error.

use crate::database::{self, SyncStats};
use crate::error::{Result, SyncError};
use crate::models::{
    NewProduct, NewSale, Platform, PlatformListing, Product, ProductStatus, RemoteStatus,
    SyncStatus,
};
use crate::platforms::{PlatformAdapter, RemoteListing, SoldSignal};
use crate::sales::SalesRecorder;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

pub struct SyncOrchestrator {
    db: Arc<Mutex<Connection>>,
    adapters: Vec<Arc<dyn PlatformAdapter>>,
    recorder: SalesRecorder,
    /// At most one in-flight reconciliation per product id
    product_locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

// ── Operation reports ──────────────────────────────────────────────────────

/// A per-platform failure captured during a multi-platform operation
#[derive(Debug, Clone, Serialize)]
pub struct SyncIssue {
    pub platform: Platform,
    pub product_id: Option<i64>,
    pub message: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub product_ids: Vec<i64>,
    pub errors: Vec<SyncIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossPostStatus {
    Created,
    Failed,
    AlreadyListed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossPostOutcome {
    pub platform: Platform,
    pub status: CrossPostStatus,
    pub external_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossPostReport {
    pub product_id: i64,
    pub outcomes: Vec<CrossPostOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SoldItem {
    pub product_id: i64,
    pub title: String,
    pub platform: Platform,
    pub sale_id: i64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CheckSoldReport {
    pub checked: usize,
    pub sold_items: Vec<SoldItem>,
    pub errors: Vec<SyncIssue>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncAllReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub errors: Vec<SyncIssue>,
}

impl SyncOrchestrator {
    /// `adapters` fixes the platform processing order for every operation.
    pub fn new(
        db: Arc<Mutex<Connection>>,
        adapters: Vec<Arc<dyn PlatformAdapter>>,
        recorder: SalesRecorder,
    ) -> Self {
        Self {
            db,
            adapters,
            recorder,
            product_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn recorder(&self) -> &SalesRecorder {
        &self.recorder
    }

    fn adapter_for(&self, platform: Platform) -> Option<&Arc<dyn PlatformAdapter>> {
        self.adapters.iter().find(|a| a.platform() == platform)
    }

    fn product_lock(&self, product_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.product_locks.lock().unwrap();
        locks
            .entry(product_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // ── Import ─────────────────────────────────────────────────────────────

    /// Pull all current listings from one platform and create local records
    /// for the ones not yet in the ledger. Idempotent: known
    /// (platform, external_id) pairs are skipped untouched.
    pub async fn import(&self, platform: Platform) -> Result<ImportReport> {
        let adapter = self
            .adapter_for(platform)
            .ok_or_else(|| SyncError::NotFound(format!("no adapter for {}", platform)))?;

        let mut report = ImportReport::default();

        let remote = match adapter.list_listings().await {
            Ok(listings) => listings,
            Err(e) => {
                log::warn!("Import from {} failed: {}", platform, e);
                report.errors.push(SyncIssue {
                    platform,
                    product_id: None,
                    message: e.to_string(),
                });
                return Ok(report);
            }
        };

        let mut conn = self.db.lock().unwrap();
        let tx = conn.transaction()?;
        for listing in remote {
            if listing.status != RemoteStatus::Active {
                continue;
            }
            if database::get_listing_by_external_id(&tx, platform, &listing.external_id)?
                .is_some()
            {
                report.skipped += 1;
                continue;
            }

            let product_id =
                database::insert_product(&tx, &new_product_from(&listing), ProductStatus::Active)?;
            database::insert_listing(
                &tx,
                product_id,
                platform,
                Some(&listing.external_id),
                listing.url.as_deref(),
                SyncStatus::Synced,
                None,
            )?;
            report.imported += 1;
            report.product_ids.push(product_id);
        }
        tx.commit()?;

        log::info!(
            "Imported {} listings from {} ({} already known)",
            report.imported,
            platform,
            report.skipped
        );
        Ok(report)
    }

    // ── Cross-post ─────────────────────────────────────────────────────────

    /// Publish one product on each requested platform it is not yet listed
    /// on. Platforms are independent: a failure is recorded on that
    /// platform's ledger row and the rest proceed.
    pub async fn cross_post(
        &self,
        product_id: i64,
        platforms: &[Platform],
    ) -> Result<CrossPostReport> {
        let product = {
            let conn = self.db.lock().unwrap();
            database::get_product(&conn, product_id)?
        }
        .ok_or_else(|| SyncError::NotFound(format!("product {}", product_id)))?;

        let mut outcomes = Vec::with_capacity(platforms.len());

        for &platform in platforms {
            let existing = {
                let conn = self.db.lock().unwrap();
                database::get_listing(&conn, product_id, platform)?
            };

            if let Some(listing) = &existing {
                if listing.sync_status == SyncStatus::Synced && listing.external_id.is_some() {
                    let conflict = SyncError::AlreadySynced {
                        product_id,
                        platform,
                    };
                    outcomes.push(CrossPostOutcome {
                        platform,
                        status: CrossPostStatus::AlreadyListed,
                        external_id: listing.external_id.clone(),
                        error: Some(conflict.to_string()),
                    });
                    continue;
                }
            }

            let Some(adapter) = self.adapter_for(platform) else {
                outcomes.push(
                    self.record_post_failure(&existing, product_id, platform, "no adapter configured")?,
                );
                continue;
            };

            match adapter.create_listing(&product).await {
                Ok(external_id) => {
                    {
                        let conn = self.db.lock().unwrap();
                        match &existing {
                            Some(listing) => database::mark_listing_synced(
                                &conn,
                                listing.id,
                                Some(&external_id),
                                None,
                            )?,
                            None => {
                                database::insert_listing(
                                    &conn,
                                    product_id,
                                    platform,
                                    Some(&external_id),
                                    None,
                                    SyncStatus::Synced,
                                    None,
                                )?;
                            }
                        }
                    }
                    log::info!(
                        "Cross-posted product {} to {} as {}",
                        product_id,
                        platform,
                        external_id
                    );
                    outcomes.push(CrossPostOutcome {
                        platform,
                        status: CrossPostStatus::Created,
                        external_id: Some(external_id),
                        error: None,
                    });
                }
                Err(e) => {
                    log::warn!("Cross-post of {} to {} failed: {}", product_id, platform, e);
                    outcomes.push(self.record_post_failure(
                        &existing,
                        product_id,
                        platform,
                        &e.to_string(),
                    )?);
                }
            }
        }

        Ok(CrossPostReport {
            product_id,
            outcomes,
        })
    }

    /// Write a failed create onto the ledger (new error row, or error state
    /// on the existing row) and build the outcome for the report.
    fn record_post_failure(
        &self,
        existing: &Option<PlatformListing>,
        product_id: i64,
        platform: Platform,
        message: &str,
    ) -> Result<CrossPostOutcome> {
        let conn = self.db.lock().unwrap();
        match existing {
            Some(listing) => database::mark_listing_error(&conn, listing.id, message)?,
            None => {
                database::insert_listing(
                    &conn,
                    product_id,
                    platform,
                    None,
                    None,
                    SyncStatus::Error,
                    Some(message),
                )?;
            }
        }
        Ok(CrossPostOutcome {
            platform,
            status: CrossPostStatus::Failed,
            external_id: None,
            error: Some(message.to_string()),
        })
    }

    // ── Sold detection ─────────────────────────────────────────────────────

    /// Sweep every platform with live listings for sales, using the signal
    /// each adapter commits to. A detected sale records exactly one Sale,
    /// flips the product, and best-effort closes sibling listings.
    pub async fn check_sold(&self) -> Result<CheckSoldReport> {
        let mut report = CheckSoldReport::default();

        for adapter in &self.adapters {
            let platform = adapter.platform();
            let listings = {
                let conn = self.db.lock().unwrap();
                database::active_listings_for_platform(&conn, platform)?
            };
            if listings.is_empty() {
                continue;
            }

            match adapter.sold_signal() {
                SoldSignal::SalesFeed => {
                    let sales = match adapter.fetch_sales().await {
                        Ok(sales) => sales,
                        Err(e) => {
                            log::warn!("Sales feed for {} unavailable: {}", platform, e);
                            report.errors.push(SyncIssue {
                                platform,
                                product_id: None,
                                message: e.to_string(),
                            });
                            continue;
                        }
                    };
                    let by_external: HashMap<&str, _> = sales
                        .iter()
                        .map(|s| (s.external_id.as_str(), s))
                        .collect();

                    for listing in listings {
                        report.checked += 1;
                        let Some(external_id) = listing.external_id.as_deref() else {
                            continue;
                        };
                        if let Some(sale) = by_external.get(external_id) {
                            self.handle_sold(
                                &listing,
                                sale.sale_price,
                                sale.sold_at.clone(),
                                &mut report,
                            )
                            .await?;
                        }
                    }
                }
                SoldSignal::ListingStatus => {
                    for listing in listings {
                        report.checked += 1;
                        let Some(external_id) = listing.external_id.as_deref() else {
                            continue;
                        };
                        match adapter.check_listing_status(external_id).await {
                            Ok(RemoteStatus::Sold) => {
                                self.handle_sold(&listing, None, None, &mut report).await?;
                            }
                            Ok(RemoteStatus::Deleted) => {
                                // Removed out-of-band; reflect it so the
                                // listing stops being polled
                                let conn = self.db.lock().unwrap();
                                database::set_listing_remote_status(
                                    &conn,
                                    listing.id,
                                    RemoteStatus::Deleted,
                                )?;
                            }
                            Ok(RemoteStatus::Active) => {}
                            Err(e) => {
                                log::warn!(
                                    "Status check for {} listing {} failed: {}",
                                    platform,
                                    external_id,
                                    e
                                );
                                report.errors.push(SyncIssue {
                                    platform,
                                    product_id: Some(listing.product_id),
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if !report.sold_items.is_empty() {
            log::info!("Sold detection found {} sales", report.sold_items.len());
        }
        Ok(report)
    }

    /// React to one confirmed sale. Under the product lock: record the Sale
    /// and flip canonical state first, then propagate to sibling platforms,
    /// then forward to accounting. Re-checks product state under the lock
    /// so racing detections of the same sale collapse into one.
    async fn handle_sold(
        &self,
        listing: &PlatformListing,
        price: Option<f64>,
        sold_at: Option<String>,
        report: &mut CheckSoldReport,
    ) -> Result<()> {
        let lock = self.product_lock(listing.product_id);
        let _guard = lock.lock().await;

        let recorded = {
            let mut conn = self.db.lock().unwrap();
            let tx = conn.transaction()?;

            let Some(product) = database::get_product(&tx, listing.product_id)? else {
                return Ok(());
            };
            if product.status == ProductStatus::Sold {
                // Another invocation already handled this sale
                return Ok(());
            }

            let new_sale = NewSale::detected(
                product.id,
                listing.platform,
                price.unwrap_or(product.price),
                sold_at.unwrap_or_else(database::now_timestamp),
            );
            let sale = database::insert_sale(&tx, &new_sale, new_sale.net_profit(0.0))?;
            database::set_product_status(&tx, product.id, ProductStatus::Sold)?;
            database::set_listing_remote_status(&tx, listing.id, RemoteStatus::Sold)?;
            tx.commit()?;
            (product, sale)
        };
        let (product, sale) = recorded;

        log::info!(
            "Product {} ({}) sold on {}",
            product.id,
            product.title,
            listing.platform
        );

        self.propagate_sold(&product, listing.platform, report)
            .await?;

        // Single forward attempt; a failure leaves the sale for the sweep
        self.recorder.forward_sale(&sale, &product).await;

        report.sold_items.push(SoldItem {
            product_id: product.id,
            title: product.title.clone(),
            platform: listing.platform,
            sale_id: sale.id,
        });
        Ok(())
    }

    /// Drive every other live listing of a sold product toward a terminal
    /// state, in fixed platform order. Each failure is recorded on its own
    /// ledger row and the remaining platforms still get their call.
    async fn propagate_sold(
        &self,
        product: &Product,
        sold_on: Platform,
        report: &mut CheckSoldReport,
    ) -> Result<()> {
        let siblings = {
            let conn = self.db.lock().unwrap();
            database::listings_for_product(&conn, product.id)?
        };

        for adapter in &self.adapters {
            let platform = adapter.platform();
            if platform == sold_on {
                continue;
            }
            let Some(listing) = siblings
                .iter()
                .find(|l| l.platform == platform && l.remote_status == RemoteStatus::Active)
            else {
                continue;
            };
            let Some(external_id) = listing.external_id.as_deref() else {
                continue;
            };

            match adapter.mark_as_sold(external_id).await {
                Ok(()) => {
                    let conn = self.db.lock().unwrap();
                    database::set_listing_remote_status(&conn, listing.id, RemoteStatus::Sold)?;
                }
                Err(SyncError::NotFound(_)) => {
                    // Already gone on the platform
                    let conn = self.db.lock().unwrap();
                    database::set_listing_remote_status(&conn, listing.id, RemoteStatus::Deleted)?;
                }
                Err(e) => {
                    log::warn!(
                        "Could not close {} listing for sold product {}: {}",
                        platform,
                        product.id,
                        e
                    );
                    {
                        let conn = self.db.lock().unwrap();
                        database::mark_listing_error(&conn, listing.id, &e.to_string())?;
                    }
                    report.errors.push(SyncIssue {
                        platform,
                        product_id: Some(product.id),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    // ── Full re-sync ───────────────────────────────────────────────────────

    /// Re-push every ledger row in error state or stale against its
    /// product. Rows that never got an external id are created, the rest
    /// updated.
    pub async fn sync_all(&self) -> Result<SyncAllReport> {
        let pending = {
            let conn = self.db.lock().unwrap();
            database::listings_needing_sync(&conn)?
        };

        let mut report = SyncAllReport {
            attempted: pending.len(),
            ..Default::default()
        };

        for listing in pending {
            let lock = self.product_lock(listing.product_id);
            let _guard = lock.lock().await;

            let product = {
                let conn = self.db.lock().unwrap();
                database::get_product(&conn, listing.product_id)?
            };
            let Some(product) = product else {
                continue;
            };
            if product.status != ProductStatus::Active {
                // Sold/inactive products are not pushed back out
                continue;
            }

            let Some(adapter) = self.adapter_for(listing.platform) else {
                report.failed += 1;
                report.errors.push(SyncIssue {
                    platform: listing.platform,
                    product_id: Some(product.id),
                    message: "no adapter configured".to_string(),
                });
                continue;
            };

            let result = match listing.external_id.as_deref() {
                Some(external_id) => adapter
                    .update_listing(external_id, &product)
                    .await
                    .map(|_| None),
                None => adapter.create_listing(&product).await.map(Some),
            };

            match result {
                Ok(created_id) => {
                    let conn = self.db.lock().unwrap();
                    database::mark_listing_synced(&conn, listing.id, created_id.as_deref(), None)?;
                    report.synced += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Re-sync of product {} on {} failed: {}",
                        product.id,
                        listing.platform,
                        e
                    );
                    {
                        let conn = self.db.lock().unwrap();
                        database::mark_listing_error(&conn, listing.id, &e.to_string())?;
                    }
                    report.failed += 1;
                    report.errors.push(SyncIssue {
                        platform: listing.platform,
                        product_id: Some(product.id),
                        message: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "SyncAll: {}/{} listings re-synced",
            report.synced,
            report.attempted
        );
        Ok(report)
    }

    // ── Stats ──────────────────────────────────────────────────────────────

    /// Ledger aggregates; a pure read
    pub fn stats(&self) -> Result<SyncStats> {
        let conn = self.db.lock().unwrap();
        Ok(database::sync_stats(&conn)?)
    }
}

/// Local product shape for an imported remote listing
fn new_product_from(listing: &RemoteListing) -> NewProduct {
    NewProduct {
        title: listing.title.clone(),
        description: listing.description.clone(),
        price: listing.price,
        images: listing.images.clone(),
        category: listing.category.clone(),
        size: listing.size.clone(),
        condition: listing.condition.clone(),
        brand: listing.brand.clone(),
        color: None,
    }
}
