//! End-to-end orchestrator tests over scripted adapters
//!
//! The adapters are mocks with per-test behavior; the database is a real
//! in-memory SQLite store so ledger semantics are exercised for real.

use async_trait::async_trait;
use listing_sync::database::{self, init_schema};
use listing_sync::error::{Result, SyncError};
use listing_sync::models::{
    NewProduct, Platform, ProductStatus, RemoteStatus, SyncStatus,
};
use listing_sync::platforms::{PlatformAdapter, RemoteListing, RemoteSale, SoldSignal};
use listing_sync::sales::SalesRecorder;
use listing_sync::sync::{CrossPostStatus, SyncOrchestrator};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ── Scripted adapter ───────────────────────────────────────────────────────

#[derive(Default)]
struct MockBehavior {
    listings: Vec<RemoteListing>,
    /// Ids handed out by create_listing, in order
    create_ids: Vec<String>,
    /// When set, create/update/mark-sold fail with a timeout
    fail_writes: bool,
    /// When set, list_listings and fetch_sales fail
    fail_reads: bool,
    statuses: HashMap<String, RemoteStatus>,
    sales: Vec<RemoteSale>,
}

struct MockAdapter {
    platform: Platform,
    signal: SoldSignal,
    behavior: Mutex<MockBehavior>,
    calls: Mutex<Vec<String>>,
}

impl MockAdapter {
    fn new(platform: Platform, signal: SoldSignal, behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            platform,
            signal,
            behavior: Mutex::new(behavior),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    async fn list_listings(&self) -> Result<Vec<RemoteListing>> {
        self.record("list_listings");
        let behavior = self.behavior.lock().unwrap();
        if behavior.fail_reads {
            return Err(SyncError::Timeout(self.platform));
        }
        Ok(behavior.listings.clone())
    }

    async fn create_listing(&self, product: &listing_sync::Product) -> Result<String> {
        self.record(format!("create_listing:{}", product.id));
        let mut behavior = self.behavior.lock().unwrap();
        if behavior.fail_writes {
            return Err(SyncError::Timeout(self.platform));
        }
        if behavior.create_ids.is_empty() {
            return Err(SyncError::Rejected {
                platform: self.platform,
                reason: "no create id scripted".to_string(),
            });
        }
        Ok(behavior.create_ids.remove(0))
    }

    async fn update_listing(&self, external_id: &str, _product: &listing_sync::Product) -> Result<()> {
        self.record(format!("update_listing:{}", external_id));
        if self.behavior.lock().unwrap().fail_writes {
            return Err(SyncError::Timeout(self.platform));
        }
        Ok(())
    }

    async fn delete_listing(&self, external_id: &str) -> Result<()> {
        self.record(format!("delete_listing:{}", external_id));
        if self.behavior.lock().unwrap().fail_writes {
            return Err(SyncError::Timeout(self.platform));
        }
        Ok(())
    }

    async fn mark_as_sold(&self, external_id: &str) -> Result<()> {
        self.record(format!("mark_as_sold:{}", external_id));
        if self.behavior.lock().unwrap().fail_writes {
            return Err(SyncError::Timeout(self.platform));
        }
        Ok(())
    }

    async fn check_listing_status(&self, external_id: &str) -> Result<RemoteStatus> {
        self.record(format!("check_listing_status:{}", external_id));
        let behavior = self.behavior.lock().unwrap();
        Ok(behavior
            .statuses
            .get(external_id)
            .copied()
            .unwrap_or(RemoteStatus::Active))
    }

    async fn fetch_sales(&self) -> Result<Vec<RemoteSale>> {
        self.record("fetch_sales");
        let behavior = self.behavior.lock().unwrap();
        if behavior.fail_reads {
            return Err(SyncError::Timeout(self.platform));
        }
        Ok(behavior.sales.clone())
    }

    fn sold_signal(&self) -> SoldSignal {
        self.signal
    }
}

// ── Fixtures ───────────────────────────────────────────────────────────────

fn remote_listing(external_id: &str, title: &str, price: f64) -> RemoteListing {
    RemoteListing {
        external_id: external_id.to_string(),
        title: title.to_string(),
        description: String::new(),
        price,
        url: None,
        status: RemoteStatus::Active,
        images: vec![],
        category: None,
        size: None,
        condition: None,
        brand: None,
    }
}

fn new_product(title: &str, price: f64) -> NewProduct {
    NewProduct {
        title: title.to_string(),
        description: String::new(),
        price,
        images: vec![],
        category: None,
        size: None,
        condition: None,
        brand: None,
        color: None,
    }
}

fn test_db() -> Arc<Mutex<Connection>> {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

fn orchestrator(
    db: &Arc<Mutex<Connection>>,
    adapters: Vec<Arc<MockAdapter>>,
) -> SyncOrchestrator {
    let dyn_adapters: Vec<Arc<dyn PlatformAdapter>> = adapters
        .into_iter()
        .map(|a| a as Arc<dyn PlatformAdapter>)
        .collect();
    let recorder = SalesRecorder::new(Arc::clone(db), None);
    SyncOrchestrator::new(Arc::clone(db), dyn_adapters, recorder)
}

// ── Import ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn import_is_idempotent() {
    let db = test_db();
    let vinted = MockAdapter::new(
        Platform::Vinted,
        SoldSignal::ListingStatus,
        MockBehavior {
            listings: vec![
                remote_listing("V1", "Wool Coat", 32.5),
                remote_listing("V2", "Denim Shirt", 12.0),
            ],
            ..Default::default()
        },
    );
    let orch = orchestrator(&db, vec![vinted]);

    let first = orch.import(Platform::Vinted).await.unwrap();
    assert_eq!(first.imported, 2);
    assert_eq!(first.skipped, 0);

    let second = orch.import(Platform::Vinted).await.unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.skipped, 2);

    let conn = db.lock().unwrap();
    let products = database::list_products(&conn, None, 100, 0).unwrap();
    assert_eq!(products.len(), 2);
    for product in &products {
        assert_eq!(product.status, ProductStatus::Active);
        let listings = database::listings_for_product(&conn, product.id).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].sync_status, SyncStatus::Synced);
    }
}

#[tokio::test]
async fn import_failure_is_a_report_not_an_error() {
    let db = test_db();
    let vinted = MockAdapter::new(
        Platform::Vinted,
        SoldSignal::ListingStatus,
        MockBehavior {
            fail_reads: true,
            ..Default::default()
        },
    );
    let orch = orchestrator(&db, vec![vinted]);

    let report = orch.import(Platform::Vinted).await.unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].platform, Platform::Vinted);
}

#[tokio::test]
async fn import_unknown_platform_is_not_found() {
    let db = test_db();
    let orch = orchestrator(&db, vec![]);
    let err = orch.import(Platform::Depop).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

// ── Cross-post ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cross_post_partial_failure_leaves_one_synced_one_error_row() {
    let db = test_db();
    let product_id = {
        let conn = db.lock().unwrap();
        database::insert_product(&conn, &new_product("Vintage Jacket", 45.0), ProductStatus::Active)
            .unwrap()
    };

    let vinted = MockAdapter::new(
        Platform::Vinted,
        SoldSignal::ListingStatus,
        MockBehavior {
            create_ids: vec!["V123".to_string()],
            ..Default::default()
        },
    );
    let depop = MockAdapter::new(
        Platform::Depop,
        SoldSignal::SalesFeed,
        MockBehavior {
            fail_writes: true,
            ..Default::default()
        },
    );
    let orch = orchestrator(&db, vec![vinted, depop]);

    let report = orch
        .cross_post(product_id, &[Platform::Vinted, Platform::Depop])
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].status, CrossPostStatus::Created);
    assert_eq!(report.outcomes[0].external_id.as_deref(), Some("V123"));
    assert_eq!(report.outcomes[1].status, CrossPostStatus::Failed);

    let conn = db.lock().unwrap();
    let synced = database::get_listing(&conn, product_id, Platform::Vinted)
        .unwrap()
        .unwrap();
    assert_eq!(synced.sync_status, SyncStatus::Synced);
    assert_eq!(synced.external_id.as_deref(), Some("V123"));

    let errored = database::get_listing(&conn, product_id, Platform::Depop)
        .unwrap()
        .unwrap();
    assert_eq!(errored.sync_status, SyncStatus::Error);
    assert!(errored.sync_error.is_some());

    // Product status unaffected by a partial cross-post
    let product = database::get_product(&conn, product_id).unwrap().unwrap();
    assert_eq!(product.status, ProductStatus::Active);
}

#[tokio::test]
async fn cross_post_to_listed_platform_is_a_conflict_outcome() {
    let db = test_db();
    let product_id = {
        let conn = db.lock().unwrap();
        let id = database::insert_product(
            &conn,
            &new_product("Vintage Jacket", 45.0),
            ProductStatus::Active,
        )
        .unwrap();
        database::insert_listing(&conn, id, Platform::Vinted, Some("V1"), None, SyncStatus::Synced, None)
            .unwrap();
        id
    };

    let vinted = MockAdapter::new(
        Platform::Vinted,
        SoldSignal::ListingStatus,
        MockBehavior::default(),
    );
    let orch = orchestrator(&db, vec![vinted.clone()]);

    let report = orch.cross_post(product_id, &[Platform::Vinted]).await.unwrap();
    assert_eq!(report.outcomes[0].status, CrossPostStatus::AlreadyListed);
    // No create call reached the platform
    assert!(vinted.calls().is_empty());
}

#[tokio::test]
async fn cross_post_unknown_product_is_not_found() {
    let db = test_db();
    let orch = orchestrator(&db, vec![]);
    let err = orch.cross_post(404, &[Platform::Vinted]).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

// ── Sold detection ─────────────────────────────────────────────────────────

/// Seed one product listed on vinted (V1), depop (D1) and marktplaats (M1)
fn seed_tri_listed(db: &Arc<Mutex<Connection>>) -> i64 {
    let conn = db.lock().unwrap();
    let id = database::insert_product(
        &conn,
        &new_product("Vintage Jacket", 45.0),
        ProductStatus::Active,
    )
    .unwrap();
    database::insert_listing(&conn, id, Platform::Vinted, Some("V1"), None, SyncStatus::Synced, None)
        .unwrap();
    database::insert_listing(&conn, id, Platform::Depop, Some("D1"), None, SyncStatus::Synced, None)
        .unwrap();
    database::insert_listing(
        &conn,
        id,
        Platform::Marktplaats,
        Some("M1"),
        None,
        SyncStatus::Synced,
        None,
    )
    .unwrap();
    id
}

#[tokio::test]
async fn sale_propagates_to_all_sibling_listings() {
    let db = test_db();
    let product_id = seed_tri_listed(&db);

    let vinted = MockAdapter::new(
        Platform::Vinted,
        SoldSignal::ListingStatus,
        MockBehavior {
            statuses: HashMap::from([("V1".to_string(), RemoteStatus::Sold)]),
            ..Default::default()
        },
    );
    let depop = MockAdapter::new(
        Platform::Depop,
        SoldSignal::SalesFeed,
        MockBehavior::default(),
    );
    // Marktplaats refuses the close; the error must stay on its row only
    let marktplaats = MockAdapter::new(
        Platform::Marktplaats,
        SoldSignal::ListingStatus,
        MockBehavior {
            fail_writes: true,
            ..Default::default()
        },
    );
    let orch = orchestrator(&db, vec![vinted, depop.clone(), marktplaats.clone()]);

    let report = orch.check_sold().await.unwrap();

    assert_eq!(report.sold_items.len(), 1);
    assert_eq!(report.sold_items[0].product_id, product_id);
    assert_eq!(report.sold_items[0].platform, Platform::Vinted);

    // Both siblings got their close call, success or not
    assert!(depop.calls().contains(&"mark_as_sold:D1".to_string()));
    assert!(marktplaats.calls().contains(&"mark_as_sold:M1".to_string()));

    let conn = db.lock().unwrap();
    // Exactly one sale
    assert_eq!(database::list_sales(&conn, 100, 0).unwrap().len(), 1);

    let product = database::get_product(&conn, product_id).unwrap().unwrap();
    assert_eq!(product.status, ProductStatus::Sold);

    let source = database::get_listing(&conn, product_id, Platform::Vinted)
        .unwrap()
        .unwrap();
    assert_eq!(source.remote_status, RemoteStatus::Sold);

    let closed = database::get_listing(&conn, product_id, Platform::Depop)
        .unwrap()
        .unwrap();
    assert_eq!(closed.remote_status, RemoteStatus::Sold);

    let failed = database::get_listing(&conn, product_id, Platform::Marktplaats)
        .unwrap()
        .unwrap();
    assert_eq!(failed.remote_status, RemoteStatus::Active);
    assert_eq!(failed.sync_status, SyncStatus::Error);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].platform, Platform::Marktplaats);
}

#[tokio::test]
async fn sales_feed_signal_uses_feed_price() {
    let db = test_db();
    let product_id = {
        let conn = db.lock().unwrap();
        let id = database::insert_product(
            &conn,
            &new_product("Band Tee", 45.0),
            ProductStatus::Active,
        )
        .unwrap();
        database::insert_listing(&conn, id, Platform::Depop, Some("D1"), None, SyncStatus::Synced, None)
            .unwrap();
        id
    };

    let depop = MockAdapter::new(
        Platform::Depop,
        SoldSignal::SalesFeed,
        MockBehavior {
            sales: vec![RemoteSale {
                external_id: "D1".to_string(),
                sale_price: Some(28.0),
                sold_at: Some("2026-08-01T09:00:00Z".to_string()),
            }],
            ..Default::default()
        },
    );
    let orch = orchestrator(&db, vec![depop.clone()]);

    let report = orch.check_sold().await.unwrap();
    assert_eq!(report.sold_items.len(), 1);

    // The feed is read once, not per listing
    let feed_reads = depop
        .calls()
        .iter()
        .filter(|c| *c == "fetch_sales")
        .count();
    assert_eq!(feed_reads, 1);

    let conn = db.lock().unwrap();
    let sales = database::list_sales(&conn, 10, 0).unwrap();
    assert_eq!(sales.len(), 1);
    assert!((sales[0].sale_price - 28.0).abs() < 1e-9);
    assert_eq!(sales[0].product_id, product_id);
    assert_eq!(sales[0].sale_date, "2026-08-01T09:00:00Z");
}

#[tokio::test]
async fn concurrent_sold_checks_record_one_sale() {
    let db = test_db();
    seed_tri_listed(&db);

    let vinted = MockAdapter::new(
        Platform::Vinted,
        SoldSignal::ListingStatus,
        MockBehavior {
            statuses: HashMap::from([("V1".to_string(), RemoteStatus::Sold)]),
            ..Default::default()
        },
    );
    let depop = MockAdapter::new(Platform::Depop, SoldSignal::SalesFeed, MockBehavior::default());
    let marktplaats = MockAdapter::new(
        Platform::Marktplaats,
        SoldSignal::ListingStatus,
        MockBehavior::default(),
    );
    let orch = Arc::new(orchestrator(&db, vec![vinted, depop, marktplaats]));

    let (first, second) = tokio::join!(orch.check_sold(), orch.check_sold());
    let sold_total = first.unwrap().sold_items.len() + second.unwrap().sold_items.len();
    assert_eq!(sold_total, 1);

    let conn = db.lock().unwrap();
    assert_eq!(database::list_sales(&conn, 100, 0).unwrap().len(), 1);
}

#[tokio::test]
async fn remotely_deleted_listing_is_reconciled() {
    let db = test_db();
    let product_id = {
        let conn = db.lock().unwrap();
        let id = database::insert_product(
            &conn,
            &new_product("Old Boots", 20.0),
            ProductStatus::Active,
        )
        .unwrap();
        database::insert_listing(&conn, id, Platform::Vinted, Some("V9"), None, SyncStatus::Synced, None)
            .unwrap();
        id
    };

    let vinted = MockAdapter::new(
        Platform::Vinted,
        SoldSignal::ListingStatus,
        MockBehavior {
            statuses: HashMap::from([("V9".to_string(), RemoteStatus::Deleted)]),
            ..Default::default()
        },
    );
    let orch = orchestrator(&db, vec![vinted]);

    let report = orch.check_sold().await.unwrap();
    assert!(report.sold_items.is_empty());

    let conn = db.lock().unwrap();
    let listing = database::get_listing(&conn, product_id, Platform::Vinted)
        .unwrap()
        .unwrap();
    assert_eq!(listing.remote_status, RemoteStatus::Deleted);
    // No sale fabricated for a deletion
    assert!(database::list_sales(&conn, 10, 0).unwrap().is_empty());
}

// ── Full re-sync ───────────────────────────────────────────────────────────

#[tokio::test]
async fn sync_all_retries_only_rows_that_need_it() {
    let db = test_db();
    let product_id = {
        let conn = db.lock().unwrap();
        let id = database::insert_product(
            &conn,
            &new_product("Vintage Jacket", 45.0),
            ProductStatus::Active,
        )
        .unwrap();
        database::insert_listing(&conn, id, Platform::Vinted, Some("V1"), None, SyncStatus::Synced, None)
            .unwrap();
        // Earlier failed create on depop: no external id yet
        database::insert_listing(&conn, id, Platform::Depop, None, None, SyncStatus::Error, Some("timeout"))
            .unwrap();
        id
    };

    let vinted = MockAdapter::new(
        Platform::Vinted,
        SoldSignal::ListingStatus,
        MockBehavior::default(),
    );
    let depop = MockAdapter::new(
        Platform::Depop,
        SoldSignal::SalesFeed,
        MockBehavior {
            create_ids: vec!["D77".to_string()],
            ..Default::default()
        },
    );
    let orch = orchestrator(&db, vec![vinted.clone(), depop.clone()]);

    let report = orch.sync_all().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 0);

    // The synced vinted row was left untouched
    assert!(vinted.calls().is_empty());
    assert!(depop
        .calls()
        .contains(&format!("create_listing:{}", product_id)));

    let conn = db.lock().unwrap();
    let recovered = database::get_listing(&conn, product_id, Platform::Depop)
        .unwrap()
        .unwrap();
    assert_eq!(recovered.sync_status, SyncStatus::Synced);
    assert_eq!(recovered.external_id.as_deref(), Some("D77"));
}

#[tokio::test]
async fn sync_all_pushes_product_edits_to_synced_rows() {
    let db = test_db();
    let product_id = {
        let conn = db.lock().unwrap();
        let id = database::insert_product(
            &conn,
            &new_product("Vintage Jacket", 45.0),
            ProductStatus::Active,
        )
        .unwrap();
        database::insert_listing(&conn, id, Platform::Vinted, Some("V1"), None, SyncStatus::Synced, None)
            .unwrap();
        id
    };

    // Edit the product after its last sync
    std::thread::sleep(std::time::Duration::from_millis(2));
    {
        let conn = db.lock().unwrap();
        database::update_product(&conn, product_id, &new_product("Vintage Jacket", 39.0)).unwrap();
    }

    let vinted = MockAdapter::new(
        Platform::Vinted,
        SoldSignal::ListingStatus,
        MockBehavior::default(),
    );
    let orch = orchestrator(&db, vec![vinted.clone()]);

    let report = orch.sync_all().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(vinted.calls().contains(&"update_listing:V1".to_string()));

    // Now in agreement again; a second pass has nothing to do
    let report = orch.sync_all().await.unwrap();
    assert_eq!(report.attempted, 0);
}

// ── Stats ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stats_reflect_ledger_state() {
    let db = test_db();
    {
        let conn = db.lock().unwrap();
        let a = database::insert_product(&conn, &new_product("A", 10.0), ProductStatus::Active)
            .unwrap();
        let b = database::insert_product(&conn, &new_product("B", 20.0), ProductStatus::Active)
            .unwrap();
        database::insert_listing(&conn, a, Platform::Vinted, Some("V1"), None, SyncStatus::Synced, None)
            .unwrap();
        database::insert_listing(&conn, b, Platform::Depop, None, None, SyncStatus::Error, Some("x"))
            .unwrap();
    }
    let orch = orchestrator(&db, vec![]);

    let stats = orch.stats().unwrap();
    assert_eq!(stats.total_listings, 2);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.needs_sync, 1);
    assert_eq!(stats.by_platform.len(), 2);
}
