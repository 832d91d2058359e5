//! Database operations for listing sync
//!
//! Uses parameterized queries exclusively (no SQL string concatenation).
//! Multi-row writes are transactional. Timestamps are stored as fixed-width
//! UTC strings so string comparison orders them chronologically.

use crate::models::{
    NewProduct, NewSale, Platform, PlatformListing, Product, ProductStatus, RemoteStatus, Sale,
    SyncStatus,
};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::str::FromStr;

/// Result type for database operations
pub type DbResult<T> = rusqlite::Result<T>;

/// Initialize the database schema
///
/// Creates tables if they don't exist:
/// - `products`: canonical product records
/// - `platform_listings`: per-(product, platform) sync ledger
/// - `sales`: detected sales and their accounting-sync state
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            price REAL NOT NULL,
            images TEXT NOT NULL DEFAULT '[]',
            category TEXT,
            size TEXT,
            condition TEXT,
            brand TEXT,
            color TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_products_status ON products(status);

        -- Sync ledger. One row per (product, platform); rows are marked, never purged.
        CREATE TABLE IF NOT EXISTS platform_listings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL,
            platform TEXT NOT NULL,
            external_id TEXT,
            listing_url TEXT,
            remote_status TEXT NOT NULL DEFAULT 'active',
            sync_status TEXT NOT NULL DEFAULT 'pending',
            sync_error TEXT,
            last_synced_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (product_id, platform),
            FOREIGN KEY (product_id) REFERENCES products(id)
        );

        CREATE INDEX IF NOT EXISTS idx_listings_platform ON platform_listings(platform);
        CREATE INDEX IF NOT EXISTS idx_listings_external ON platform_listings(platform, external_id);

        CREATE TABLE IF NOT EXISTS sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL,
            platform TEXT NOT NULL,
            sale_price REAL NOT NULL,
            shipping_cost REAL NOT NULL DEFAULT 0,
            platform_fee REAL NOT NULL DEFAULT 0,
            payment_fee REAL NOT NULL DEFAULT 0,
            net_profit REAL NOT NULL,
            sale_date TEXT NOT NULL,
            synced_to_sheets INTEGER NOT NULL DEFAULT 0,
            sheets_row_number INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY (product_id) REFERENCES products(id)
        );

        CREATE INDEX IF NOT EXISTS idx_sales_synced ON sales(synced_to_sheets);
        ",
    )?;

    log::info!("Database schema initialized");
    Ok(())
}

/// Current UTC time, fixed-width so stored values compare chronologically
pub fn now_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

fn parse_field<T: FromStr>(idx: usize, value: String) -> rusqlite::Result<T> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected value: {}", value).into(),
        )
    })
}

// ── Products ───────────────────────────────────────────────────────────────

const PRODUCT_COLS: &str =
    "id, title, description, price, images, category, size, condition, brand, color, status, created_at, updated_at";

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    let images_json: String = row.get(4)?;
    let status: String = row.get(10)?;
    Ok(Product {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        images: serde_json::from_str(&images_json).unwrap_or_default(),
        category: row.get(5)?,
        size: row.get(6)?,
        condition: row.get(7)?,
        brand: row.get(8)?,
        color: row.get(9)?,
        status: parse_field(10, status)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Insert a new product, returning its id
pub fn insert_product(
    conn: &Connection,
    new: &NewProduct,
    status: ProductStatus,
) -> DbResult<i64> {
    let now = now_timestamp();
    let images = serde_json::to_string(&new.images).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO products
         (title, description, price, images, category, size, condition, brand, color, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            &new.title,
            &new.description,
            new.price,
            &images,
            &new.category,
            &new.size,
            &new.condition,
            &new.brand,
            &new.color,
            status.as_str(),
            &now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get a product by id
pub fn get_product(conn: &Connection, id: i64) -> DbResult<Option<Product>> {
    let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS);
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(product_from_row(row)?)),
        None => Ok(None),
    }
}

/// List products, optionally filtered by status, newest first
pub fn list_products(
    conn: &Connection,
    status: Option<ProductStatus>,
    limit: usize,
    offset: usize,
) -> DbResult<Vec<Product>> {
    let sql = format!(
        "SELECT {} FROM products
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY id DESC
         LIMIT ?2 OFFSET ?3",
        PRODUCT_COLS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(
        params![status.map(|s| s.as_str()), limit, offset],
        product_from_row,
    )?;
    rows.collect()
}

/// All products currently in `active` status
pub fn active_products(conn: &Connection) -> DbResult<Vec<Product>> {
    let sql = format!(
        "SELECT {} FROM products WHERE status = 'active' ORDER BY id",
        PRODUCT_COLS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([], product_from_row)?;
    rows.collect()
}

/// Update a product's editable fields, bumping `updated_at` so SyncAll
/// picks the change up
pub fn update_product(conn: &Connection, id: i64, new: &NewProduct) -> DbResult<bool> {
    let images = serde_json::to_string(&new.images).unwrap_or_else(|_| "[]".to_string());
    let changed = conn.execute(
        "UPDATE products
         SET title = ?2, description = ?3, price = ?4, images = ?5, category = ?6,
             size = ?7, condition = ?8, brand = ?9, color = ?10, updated_at = ?11
         WHERE id = ?1",
        params![
            id,
            &new.title,
            &new.description,
            new.price,
            &images,
            &new.category,
            &new.size,
            &new.condition,
            &new.brand,
            &new.color,
            now_timestamp(),
        ],
    )?;
    Ok(changed > 0)
}

/// Set a product's lifecycle status
pub fn set_product_status(conn: &Connection, id: i64, status: ProductStatus) -> DbResult<bool> {
    let changed = conn.execute(
        "UPDATE products SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), now_timestamp()],
    )?;
    Ok(changed > 0)
}

// ── Platform listings (the ledger) ─────────────────────────────────────────

const LISTING_COLS: &str =
    "id, product_id, platform, external_id, listing_url, remote_status, sync_status, sync_error, last_synced_at, created_at, updated_at";

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<PlatformListing> {
    let platform: String = row.get(2)?;
    let remote_status: String = row.get(5)?;
    let sync_status: String = row.get(6)?;
    Ok(PlatformListing {
        id: row.get(0)?,
        product_id: row.get(1)?,
        platform: parse_field(2, platform)?,
        external_id: row.get(3)?,
        listing_url: row.get(4)?,
        remote_status: parse_field(5, remote_status)?,
        sync_status: parse_field(6, sync_status)?,
        sync_error: row.get(7)?,
        last_synced_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Insert a ledger row for (product, platform)
///
/// `last_synced_at` is stamped only when the row is born synced. Fails with
/// a constraint error if the pair already has a row.
pub fn insert_listing(
    conn: &Connection,
    product_id: i64,
    platform: Platform,
    external_id: Option<&str>,
    listing_url: Option<&str>,
    sync_status: SyncStatus,
    sync_error: Option<&str>,
) -> DbResult<i64> {
    let now = now_timestamp();
    let last_synced = match sync_status {
        SyncStatus::Synced => Some(now.clone()),
        _ => None,
    };
    conn.execute(
        "INSERT INTO platform_listings
         (product_id, platform, external_id, listing_url, remote_status, sync_status, sync_error, last_synced_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7, ?8, ?8)",
        params![
            product_id,
            platform.as_str(),
            external_id,
            listing_url,
            sync_status.as_str(),
            sync_error,
            last_synced,
            &now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Ledger row for one (product, platform) pair
pub fn get_listing(
    conn: &Connection,
    product_id: i64,
    platform: Platform,
) -> DbResult<Option<PlatformListing>> {
    let sql = format!(
        "SELECT {} FROM platform_listings WHERE product_id = ?1 AND platform = ?2",
        LISTING_COLS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(params![product_id, platform.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(Some(listing_from_row(row)?)),
        None => Ok(None),
    }
}

/// Ledger row by the platform's own listing id (import duplicate detection)
pub fn get_listing_by_external_id(
    conn: &Connection,
    platform: Platform,
    external_id: &str,
) -> DbResult<Option<PlatformListing>> {
    let sql = format!(
        "SELECT {} FROM platform_listings WHERE platform = ?1 AND external_id = ?2",
        LISTING_COLS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(params![platform.as_str(), external_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(listing_from_row(row)?)),
        None => Ok(None),
    }
}

/// All ledger rows for a product
pub fn listings_for_product(conn: &Connection, product_id: i64) -> DbResult<Vec<PlatformListing>> {
    let sql = format!(
        "SELECT {} FROM platform_listings WHERE product_id = ?1 ORDER BY id",
        LISTING_COLS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![product_id], listing_from_row)?;
    rows.collect()
}

/// Listings still live on one platform (remote active, external id known)
pub fn active_listings_for_platform(
    conn: &Connection,
    platform: Platform,
) -> DbResult<Vec<PlatformListing>> {
    let sql = format!(
        "SELECT {} FROM platform_listings
         WHERE platform = ?1 AND remote_status = 'active' AND external_id IS NOT NULL
         ORDER BY id",
        LISTING_COLS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![platform.as_str()], listing_from_row)?;
    rows.collect()
}

/// Listings SyncAll has to touch: sync state pending/error, or the product
/// changed after the listing's last successful sync. Terminal rows are left
/// alone.
pub fn listings_needing_sync(conn: &Connection) -> DbResult<Vec<PlatformListing>> {
    let mut stmt = conn.prepare_cached(
        "SELECT l.id, l.product_id, l.platform, l.external_id, l.listing_url, l.remote_status,
                l.sync_status, l.sync_error, l.last_synced_at, l.created_at, l.updated_at
         FROM platform_listings l
         JOIN products p ON p.id = l.product_id
         WHERE l.remote_status = 'active'
           AND (l.sync_status IN ('pending', 'error')
                OR (l.last_synced_at IS NOT NULL AND p.updated_at > l.last_synced_at))
         ORDER BY l.id",
    )?;
    let rows = stmt.query_map([], listing_from_row)?;
    rows.collect()
}

/// Record a successful sync attempt on a ledger row
pub fn mark_listing_synced(
    conn: &Connection,
    listing_id: i64,
    external_id: Option<&str>,
    listing_url: Option<&str>,
) -> DbResult<()> {
    let now = now_timestamp();
    conn.execute(
        "UPDATE platform_listings
         SET sync_status = 'synced',
             sync_error = NULL,
             external_id = COALESCE(?2, external_id),
             listing_url = COALESCE(?3, listing_url),
             last_synced_at = ?4,
             updated_at = ?4
         WHERE id = ?1",
        params![listing_id, external_id, listing_url, &now],
    )?;
    Ok(())
}

/// Record a failed sync attempt on a ledger row
pub fn mark_listing_error(conn: &Connection, listing_id: i64, message: &str) -> DbResult<()> {
    conn.execute(
        "UPDATE platform_listings
         SET sync_status = 'error', sync_error = ?2, updated_at = ?3
         WHERE id = ?1",
        params![listing_id, message, now_timestamp()],
    )?;
    Ok(())
}

/// Move a ledger row's remote state (active -> sold/deleted)
pub fn set_listing_remote_status(
    conn: &Connection,
    listing_id: i64,
    status: RemoteStatus,
) -> DbResult<()> {
    conn.execute(
        "UPDATE platform_listings
         SET remote_status = ?2, updated_at = ?3
         WHERE id = ?1",
        params![listing_id, status.as_str(), now_timestamp()],
    )?;
    Ok(())
}

// ── Sales ──────────────────────────────────────────────────────────────────

const SALE_COLS: &str =
    "id, product_id, platform, sale_price, shipping_cost, platform_fee, payment_fee, net_profit, sale_date, synced_to_sheets, sheets_row_number, created_at";

fn sale_from_row(row: &Row<'_>) -> rusqlite::Result<Sale> {
    let platform: String = row.get(2)?;
    let synced: i64 = row.get(9)?;
    Ok(Sale {
        id: row.get(0)?,
        product_id: row.get(1)?,
        platform: parse_field(2, platform)?,
        sale_price: row.get(3)?,
        shipping_cost: row.get(4)?,
        platform_fee: row.get(5)?,
        payment_fee: row.get(6)?,
        net_profit: row.get(7)?,
        sale_date: row.get(8)?,
        synced_to_sheets: synced != 0,
        sheets_row_number: row.get(10)?,
        created_at: row.get(11)?,
    })
}

/// Persist a detected sale, returning the stored record
pub fn insert_sale(conn: &Connection, new: &NewSale, net_profit: f64) -> DbResult<Sale> {
    conn.execute(
        "INSERT INTO sales
         (product_id, platform, sale_price, shipping_cost, platform_fee, payment_fee, net_profit, sale_date, synced_to_sheets, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
        params![
            new.product_id,
            new.platform.as_str(),
            new.sale_price,
            new.shipping_cost,
            new.platform_fee,
            new.payment_fee,
            net_profit,
            &new.sale_date,
            now_timestamp(),
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_sale(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Get a sale by id
pub fn get_sale(conn: &Connection, id: i64) -> DbResult<Option<Sale>> {
    let sql = format!("SELECT {} FROM sales WHERE id = ?1", SALE_COLS);
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(sale_from_row(row)?)),
        None => Ok(None),
    }
}

/// All sales, newest first
pub fn list_sales(conn: &Connection, limit: usize, offset: usize) -> DbResult<Vec<Sale>> {
    let sql = format!(
        "SELECT {} FROM sales ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        SALE_COLS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![limit, offset], sale_from_row)?;
    rows.collect()
}

/// Sales not yet forwarded to the accounting sink (retry sweep input)
pub fn unsynced_sales(conn: &Connection) -> DbResult<Vec<Sale>> {
    let sql = format!(
        "SELECT {} FROM sales WHERE synced_to_sheets = 0 ORDER BY id",
        SALE_COLS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([], sale_from_row)?;
    rows.collect()
}

/// Flip a sale's accounting-sync flag after a successful forward
pub fn mark_sale_synced(conn: &Connection, sale_id: i64, row_number: i64) -> DbResult<()> {
    conn.execute(
        "UPDATE sales SET synced_to_sheets = 1, sheets_row_number = ?2 WHERE id = ?1",
        params![sale_id, row_number],
    )?;
    Ok(())
}

// ── Aggregations ───────────────────────────────────────────────────────────

/// Per-platform listing count
#[derive(Debug, Clone, Serialize)]
pub struct PlatformCount {
    pub platform: Platform,
    pub count: i64,
}

/// Ledger aggregates returned by Stats()
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub total_listings: i64,
    pub needs_sync: i64,
    pub errors: i64,
    pub by_platform: Vec<PlatformCount>,
}

/// Aggregate the ledger: totals, needs-sync, errors, per-platform breakdown
pub fn sync_stats(conn: &Connection) -> DbResult<SyncStats> {
    let total_listings: i64 =
        conn.query_row("SELECT COUNT(*) FROM platform_listings", [], |row| {
            row.get(0)
        })?;
    let needs_sync = listings_needing_sync(conn)?.len() as i64;
    let errors: i64 = conn.query_row(
        "SELECT COUNT(*) FROM platform_listings WHERE sync_status = 'error'",
        [],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare_cached(
        "SELECT platform, COUNT(*) FROM platform_listings GROUP BY platform ORDER BY platform",
    )?;
    let by_platform: DbResult<Vec<PlatformCount>> = stmt
        .query_map([], |row| {
            let platform: String = row.get(0)?;
            Ok(PlatformCount {
                platform: parse_field(0, platform)?,
                count: row.get(1)?,
            })
        })?
        .collect();

    Ok(SyncStats {
        total_listings,
        needs_sync,
        errors,
        by_platform: by_platform?,
    })
}

/// Sales aggregates for the reporting endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SalesSummary {
    pub total_sales: i64,
    pub total_revenue: f64,
    pub total_profit: f64,
    pub by_platform: Vec<PlatformCount>,
}

/// Aggregate recorded sales: counts, revenue, profit, per-platform sales
pub fn sales_summary(conn: &Connection) -> DbResult<SalesSummary> {
    let (total_sales, total_revenue, total_profit) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(sale_price), 0), COALESCE(SUM(net_profit), 0) FROM sales",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let mut stmt = conn
        .prepare_cached("SELECT platform, COUNT(*) FROM sales GROUP BY platform ORDER BY platform")?;
    let by_platform: DbResult<Vec<PlatformCount>> = stmt
        .query_map([], |row| {
            let platform: String = row.get(0)?;
            Ok(PlatformCount {
                platform: parse_field(0, platform)?,
                count: row.get(1)?,
            })
        })?
        .collect();

    Ok(SalesSummary {
        total_sales,
        total_revenue,
        total_profit,
        by_platform: by_platform?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create an in-memory database for testing
    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn test_product(title: &str) -> NewProduct {
        NewProduct {
            title: title.to_string(),
            description: "A product".to_string(),
            price: 45.0,
            images: vec!["https://img.example/1.jpg".to_string()],
            category: Some("jackets".to_string()),
            size: Some("M".to_string()),
            condition: Some("good".to_string()),
            brand: Some("Acme".to_string()),
            color: None,
        }
    }

    #[test]
    fn init_schema_creates_tables() {
        let conn = test_db();
        for table in ["products", "platform_listings", "sales"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn insert_and_get_product_round_trips() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("Vintage Jacket"), ProductStatus::Active)
            .unwrap();

        let product = get_product(&conn, id).unwrap().unwrap();
        assert_eq!(product.title, "Vintage Jacket");
        assert_eq!(product.status, ProductStatus::Active);
        assert_eq!(product.images, vec!["https://img.example/1.jpg"]);
        assert_eq!(product.brand.as_deref(), Some("Acme"));
    }

    #[test]
    fn get_product_missing_returns_none() {
        let conn = test_db();
        assert!(get_product(&conn, 999).unwrap().is_none());
    }

    #[test]
    fn list_products_filters_by_status() {
        let conn = test_db();
        insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();
        insert_product(&conn, &test_product("B"), ProductStatus::Sold).unwrap();

        let active = list_products(&conn, Some(ProductStatus::Active), 100, 0).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "A");

        let all = list_products(&conn, None, 100, 0).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn update_product_bumps_updated_at() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();
        let before = get_product(&conn, id).unwrap().unwrap();

        let mut changed = test_product("A (renamed)");
        changed.price = 50.0;
        assert!(update_product(&conn, id, &changed).unwrap());

        let after = get_product(&conn, id).unwrap().unwrap();
        assert_eq!(after.title, "A (renamed)");
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn listing_unique_per_product_platform() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();

        insert_listing(&conn, id, Platform::Vinted, Some("V1"), None, SyncStatus::Synced, None)
            .unwrap();
        let dup = insert_listing(
            &conn,
            id,
            Platform::Vinted,
            Some("V2"),
            None,
            SyncStatus::Synced,
            None,
        );
        assert!(dup.is_err());

        // A different platform is fine
        insert_listing(&conn, id, Platform::Depop, Some("D1"), None, SyncStatus::Synced, None)
            .unwrap();
    }

    #[test]
    fn synced_listing_gets_last_synced_stamp() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();

        insert_listing(&conn, id, Platform::Vinted, Some("V1"), None, SyncStatus::Synced, None)
            .unwrap();
        insert_listing(&conn, id, Platform::Depop, None, None, SyncStatus::Error, Some("boom"))
            .unwrap();

        let synced = get_listing(&conn, id, Platform::Vinted).unwrap().unwrap();
        assert!(synced.last_synced_at.is_some());

        let errored = get_listing(&conn, id, Platform::Depop).unwrap().unwrap();
        assert!(errored.last_synced_at.is_none());
        assert_eq!(errored.sync_error.as_deref(), Some("boom"));
    }

    #[test]
    fn lookup_by_external_id() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();
        insert_listing(&conn, id, Platform::Vinted, Some("V123"), None, SyncStatus::Synced, None)
            .unwrap();

        let found = get_listing_by_external_id(&conn, Platform::Vinted, "V123")
            .unwrap()
            .unwrap();
        assert_eq!(found.product_id, id);

        // Same external id on a different platform is a different listing
        assert!(get_listing_by_external_id(&conn, Platform::Depop, "V123")
            .unwrap()
            .is_none());
    }

    #[test]
    fn needing_sync_includes_errors_and_stale_rows() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();
        let ok = insert_listing(
            &conn,
            id,
            Platform::Vinted,
            Some("V1"),
            None,
            SyncStatus::Synced,
            None,
        )
        .unwrap();
        insert_listing(&conn, id, Platform::Depop, None, None, SyncStatus::Error, Some("x"))
            .unwrap();

        // Only the error row needs sync so far
        let pending = listings_needing_sync(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].platform, Platform::Depop);

        // Touch the product: the synced row becomes stale too
        update_product(&conn, id, &test_product("A v2")).unwrap();
        let pending = listings_needing_sync(&conn).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|l| l.id == ok));
    }

    #[test]
    fn terminal_listings_never_need_sync() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();
        let listing = insert_listing(
            &conn,
            id,
            Platform::Vinted,
            Some("V1"),
            None,
            SyncStatus::Error,
            Some("x"),
        )
        .unwrap();

        set_listing_remote_status(&conn, listing, RemoteStatus::Sold).unwrap();
        assert!(listings_needing_sync(&conn).unwrap().is_empty());
    }

    #[test]
    fn mark_synced_clears_error_and_keeps_external_id() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();
        let listing = insert_listing(
            &conn,
            id,
            Platform::Vinted,
            Some("V1"),
            None,
            SyncStatus::Error,
            Some("timeout"),
        )
        .unwrap();

        mark_listing_synced(&conn, listing, None, None).unwrap();
        let row = get_listing(&conn, id, Platform::Vinted).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert!(row.sync_error.is_none());
        assert_eq!(row.external_id.as_deref(), Some("V1"));
        assert!(row.last_synced_at.is_some());
    }

    #[test]
    fn active_listings_excludes_terminal_and_unposted() {
        let conn = test_db();
        let a = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();
        let b = insert_product(&conn, &test_product("B"), ProductStatus::Active).unwrap();
        let c = insert_product(&conn, &test_product("C"), ProductStatus::Active).unwrap();

        insert_listing(&conn, a, Platform::Vinted, Some("V1"), None, SyncStatus::Synced, None)
            .unwrap();
        // No external id yet: nothing to check remotely
        insert_listing(&conn, b, Platform::Vinted, None, None, SyncStatus::Error, Some("x"))
            .unwrap();
        let sold = insert_listing(
            &conn,
            c,
            Platform::Vinted,
            Some("V3"),
            None,
            SyncStatus::Synced,
            None,
        )
        .unwrap();
        set_listing_remote_status(&conn, sold, RemoteStatus::Sold).unwrap();

        let active = active_listings_for_platform(&conn, Platform::Vinted).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].product_id, a);
    }

    #[test]
    fn sale_round_trip_and_unsynced_sweep() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();

        let new = NewSale::detected(id, Platform::Vinted, 45.0, now_timestamp());
        let sale = insert_sale(&conn, &new, new.net_profit(0.0)).unwrap();
        assert!(!sale.synced_to_sheets);
        assert!((sale.net_profit - 45.0).abs() < 1e-9);

        assert_eq!(unsynced_sales(&conn).unwrap().len(), 1);
        mark_sale_synced(&conn, sale.id, 17).unwrap();
        assert!(unsynced_sales(&conn).unwrap().is_empty());

        let stored = get_sale(&conn, sale.id).unwrap().unwrap();
        assert!(stored.synced_to_sheets);
        assert_eq!(stored.sheets_row_number, Some(17));
    }

    #[test]
    fn sync_stats_counts_and_breakdown() {
        let conn = test_db();
        let a = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();
        let b = insert_product(&conn, &test_product("B"), ProductStatus::Active).unwrap();

        insert_listing(&conn, a, Platform::Vinted, Some("V1"), None, SyncStatus::Synced, None)
            .unwrap();
        insert_listing(&conn, a, Platform::Depop, None, None, SyncStatus::Error, Some("x"))
            .unwrap();
        insert_listing(&conn, b, Platform::Vinted, Some("V2"), None, SyncStatus::Synced, None)
            .unwrap();

        let stats = sync_stats(&conn).unwrap();
        assert_eq!(stats.total_listings, 3);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.needs_sync, 1);
        assert_eq!(stats.by_platform.len(), 2);
        let vinted = stats
            .by_platform
            .iter()
            .find(|c| c.platform == Platform::Vinted)
            .unwrap();
        assert_eq!(vinted.count, 2);
    }

    #[test]
    fn sales_summary_totals() {
        let conn = test_db();
        let id = insert_product(&conn, &test_product("A"), ProductStatus::Active).unwrap();

        let first = NewSale::detected(id, Platform::Vinted, 40.0, now_timestamp());
        insert_sale(&conn, &first, first.net_profit(10.0)).unwrap();
        let second = NewSale::detected(id, Platform::Depop, 60.0, now_timestamp());
        insert_sale(&conn, &second, second.net_profit(20.0)).unwrap();

        let summary = sales_summary(&conn).unwrap();
        assert_eq!(summary.total_sales, 2);
        assert!((summary.total_revenue - 100.0).abs() < 1e-9);
        assert!((summary.total_profit - 70.0).abs() < 1e-9);
    }

    #[test]
    fn timestamps_order_lexicographically() {
        let earlier = now_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = now_timestamp();
        assert!(later > earlier);
    }
}
