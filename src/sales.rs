//! Sale recording and accounting forwarding
//!
//! A detected sale is persisted first, then forwarded to the accounting
//! sink exactly once. A failed forward leaves the sale flagged unsynced for
//! the retry sweep; it is never retried inline so sold-detection is not
//! blocked on bookkeeping.

use crate::database::{self, DbResult};
use crate::error::{Result, SyncError};
use crate::models::{NewSale, Product, Sale};
use crate::sheets::AccountingSink;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};

pub struct SalesRecorder {
    db: Arc<Mutex<Connection>>,
    sink: Option<Arc<dyn AccountingSink>>,
}

/// Outcome of a retry sweep over unsynced sales
#[derive(Debug, Default, Clone, Serialize)]
pub struct RetryReport {
    pub attempted: usize,
    pub forwarded: usize,
    pub failed: usize,
}

impl SalesRecorder {
    /// `sink` is None when the accounting side is not configured; sales are
    /// then recorded locally and stay unsynced.
    pub fn new(db: Arc<Mutex<Connection>>, sink: Option<Arc<dyn AccountingSink>>) -> Self {
        Self { db, sink }
    }

    /// Persist a sale and make one forward attempt.
    ///
    /// Persistence failure is fatal to the caller; forward failure is not.
    pub async fn record_sale(&self, new: &NewSale) -> Result<Sale> {
        let (sale, product) = {
            let conn = self.db.lock().unwrap();
            let product = database::get_product(&conn, new.product_id)?
                .ok_or_else(|| SyncError::NotFound(format!("product {}", new.product_id)))?;
            let sale = database::insert_sale(&conn, new, new.net_profit(0.0))?;
            (sale, product)
        };

        log::info!(
            "Recorded sale {} for product {} on {} at {:.2}",
            sale.id,
            sale.product_id,
            sale.platform,
            sale.sale_price
        );

        self.forward_sale(&sale, &product).await;
        Ok(sale)
    }

    /// Re-attempt every sale still flagged unsynced
    pub async fn retry_unsynced(&self) -> Result<RetryReport> {
        let pending = {
            let conn = self.db.lock().unwrap();
            database::unsynced_sales(&conn)?
        };

        let mut report = RetryReport {
            attempted: pending.len(),
            ..Default::default()
        };

        for sale in pending {
            let product = {
                let conn = self.db.lock().unwrap();
                database::get_product(&conn, sale.product_id)?
            };
            let Some(product) = product else {
                log::warn!("Sale {} references missing product {}", sale.id, sale.product_id);
                report.failed += 1;
                continue;
            };
            if self.forward_sale(&sale, &product).await {
                report.forwarded += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.attempted > 0 {
            log::info!(
                "Accounting retry sweep: {}/{} forwarded",
                report.forwarded,
                report.attempted
            );
        }
        Ok(report)
    }

    /// One forward attempt; flips the sale's sync flag on success
    pub async fn forward_sale(&self, sale: &Sale, product: &Product) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };

        match sink.append_sale_row(sale, product).await {
            Ok(row) => {
                let marked: DbResult<()> = {
                    let conn = self.db.lock().unwrap();
                    database::mark_sale_synced(&conn, sale.id, row)
                };
                if let Err(e) = marked {
                    log::error!("Forwarded sale {} but could not flag it: {}", sale.id, e);
                    return false;
                }
                true
            }
            Err(e) => {
                log::warn!("Failed to forward sale {} to accounting: {}", sale.id, e);
                false
            }
        }
    }
}
