//! Google Sheets accounting sink
//!
//! Sales are mirrored into a spreadsheet for bookkeeping: one appended row
//! per sale. The sink is a trait so the recorder can be exercised without a
//! network.

use crate::config::SheetsSettings;
use crate::error::{Result, SyncError};
use crate::models::{Product, Sale};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// External accounting collaborator: append one row per sale, returning the
/// row number it landed on.
#[async_trait]
pub trait AccountingSink: Send + Sync {
    async fn append_sale_row(&self, sale: &Sale, product: &Product) -> Result<i64>;
}

/// Sheets REST client (`values:append` on a fixed worksheet)
///
/// Carries a ready bearer token; how that token is obtained is outside this
/// process.
pub struct SheetsClient {
    client: reqwest::Client,
    access_token: Option<String>,
    spreadsheet_id: Option<String>,
    pub(crate) base_url: String,
    timeout: Duration,
}

const SALES_RANGE: &str = "Sales!A1";

#[derive(Debug, Deserialize)]
struct AppendResponse {
    updates: AppendUpdates,
}

#[derive(Debug, Deserialize)]
struct AppendUpdates {
    #[serde(rename = "updatedRange")]
    updated_range: String,
}

impl SheetsClient {
    pub fn new(settings: &SheetsSettings, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: settings.access_token.clone(),
            spreadsheet_id: settings.spreadsheet_id.clone(),
            base_url: settings.base_url.clone(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (&self.access_token, &self.spreadsheet_id) {
            (Some(token), Some(id)) => Ok((token, id)),
            _ => Err(SyncError::NotFound(
                "google sheets credentials not configured".to_string(),
            )),
        }
    }

    /// One spreadsheet row per sale: date, ids, pricing, fees, profit
    fn sale_row(sale: &Sale, product: &Product) -> Vec<serde_json::Value> {
        vec![
            json!(sale.sale_date),
            json!(sale.product_id),
            json!(product.title),
            json!(sale.platform.as_str()),
            json!(sale.sale_price),
            json!(sale.shipping_cost),
            json!(sale.platform_fee),
            json!(sale.payment_fee),
            json!(sale.net_profit),
            json!(product.category.clone().unwrap_or_default()),
            json!(product.brand.clone().unwrap_or_default()),
            json!(product.size.clone().unwrap_or_default()),
        ]
    }
}

/// Parse the appended row number out of an A1 range like `Sales!A17:L17`
fn row_from_range(range: &str) -> Option<i64> {
    let cell = range.split('!').nth(1)?.split(':').next()?;
    let digits: String = cell.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[async_trait]
impl AccountingSink for SheetsClient {
    async fn append_sale_row(&self, sale: &Sale, product: &Product) -> Result<i64> {
        let (token, spreadsheet_id) = self.credentials()?;
        let url = format!(
            "{}/spreadsheets/{}/values/{}:append",
            self.base_url, spreadsheet_id, SALES_RANGE
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(token)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "values": [Self::sale_row(sale, product)] }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::HttpStatus(response.status()));
        }

        let appended: AppendResponse = response.json().await?;
        let row = row_from_range(&appended.updates.updated_range).unwrap_or(0);
        log::info!(
            "Appended sale {} for product {} to sheets row {}",
            sale.id,
            sale.product_id,
            row
        );
        Ok(row)
    }
}
