//! Depop adapter (authenticated web API session)
//!
//! Depop's item endpoint does not distinguish sold from delisted, so sold
//! detection reads the sales feed instead.

use crate::config::SessionCredentials;
use crate::error::{Result, SyncError};
use crate::models::{Platform, Product, RemoteStatus};
use crate::platforms::{PlatformAdapter, RemoteListing, RemoteSale, SoldSignal};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;

pub struct DepopAdapter {
    client: reqwest::Client,
    username: Option<String>,
    password: Option<String>,
    pub(crate) base_url: String,
    timeout: Duration,
    session_token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ShopProducts {
    products: Vec<ShopProduct>,
}

#[derive(Debug, Deserialize)]
struct ShopProduct {
    id: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "priceAmount", default)]
    price_amount: f64,
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "pictureUrls", default)]
    picture_urls: Vec<String>,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(rename = "categoryPath", default)]
    category_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SalesFeedResponse {
    sales: Vec<SaleEvent>,
}

#[derive(Debug, Deserialize)]
struct SaleEvent {
    #[serde(rename = "productId")]
    product_id: String,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(rename = "soldAt", default)]
    sold_at: Option<String>,
}

impl DepopAdapter {
    pub fn new(credentials: &SessionCredentials, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            username: credentials.email.clone(),
            password: credentials.password.clone(),
            base_url: credentials.base_url.clone(),
            timeout: Duration::from_secs(timeout_secs),
            session_token: RwLock::new(None),
        }
    }

    async fn session(&self) -> Result<String> {
        if let Some(token) = self.session_token.read().await.clone() {
            return Ok(token);
        }
        self.authenticate().await?;
        self.session_token
            .read()
            .await
            .clone()
            .ok_or(SyncError::Authentication(Platform::Depop))
    }

    async fn send_authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.session().await?;
        let response = builder
            .timeout(self.timeout)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Depop))?;
        check_status(response).await
    }

    fn product_payload(&self, product: &Product) -> serde_json::Value {
        // Depop has no separate title field: the first description line
        // doubles as the headline.
        let description = if product.description.is_empty() {
            product.title.clone()
        } else {
            format!("{}\n\n{}", product.title, product.description)
        };
        json!({
            "description": description,
            "priceAmount": product.price,
            "brand": product.brand,
            "size": product.size,
            "condition": product.condition,
            "categoryPath": product.category,
            "pictureUrls": product.images,
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SyncError::Authentication(Platform::Depop))
        }
        StatusCode::NOT_FOUND => Err(SyncError::NotFound("product".to_string())),
        StatusCode::BAD_REQUEST => {
            let reason = response.text().await.unwrap_or_default();
            Err(SyncError::Rejected {
                platform: Platform::Depop,
                reason,
            })
        }
        status => Err(SyncError::HttpStatus(status)),
    }
}

fn map_status(status: Option<&str>) -> RemoteStatus {
    match status {
        Some("sold") => RemoteStatus::Sold,
        Some("deleted") => RemoteStatus::Deleted,
        _ => RemoteStatus::Active,
    }
}

impl From<ShopProduct> for RemoteListing {
    fn from(p: ShopProduct) -> Self {
        let title = p
            .description
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        RemoteListing {
            external_id: p.id,
            title,
            description: p.description,
            price: p.price_amount,
            url: None,
            status: map_status(p.status.as_deref()),
            images: p.picture_urls,
            category: p.category_path,
            size: p.size,
            condition: None,
            brand: p.brand,
        }
    }
}

#[async_trait]
impl PlatformAdapter for DepopAdapter {
    fn platform(&self) -> Platform {
        Platform::Depop
    }

    async fn authenticate(&self) -> Result<()> {
        let (username, password) = match (&self.username, &self.password) {
            (Some(u), Some(p)) => (u, p),
            _ => return Err(SyncError::Authentication(Platform::Depop)),
        };

        let response = self
            .client
            .post(format!("{}/api/auth/v1/login", self.base_url))
            .timeout(self.timeout)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Depop))?;

        if !response.status().is_success() {
            return Err(SyncError::Authentication(Platform::Depop));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Depop))?;
        *self.session_token.write().await = Some(login.token);
        log::info!("Authenticated with depop");
        Ok(())
    }

    async fn list_listings(&self) -> Result<Vec<RemoteListing>> {
        let request = self
            .client
            .get(format!("{}/api/v1/shop/products", self.base_url));
        let response = self.send_authed(request).await?;
        let shop: ShopProducts = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Depop))?;
        Ok(shop.products.into_iter().map(Into::into).collect())
    }

    async fn create_listing(&self, product: &Product) -> Result<String> {
        let request = self
            .client
            .post(format!("{}/api/v1/products", self.base_url))
            .json(&self.product_payload(product));
        let response = self.send_authed(request).await?;
        let created: ShopProduct = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Depop))?;
        log::info!("Created depop product {}", created.id);
        Ok(created.id)
    }

    async fn update_listing(&self, external_id: &str, product: &Product) -> Result<()> {
        let request = self
            .client
            .put(format!("{}/api/v1/products/{}", self.base_url, external_id))
            .json(&self.product_payload(product));
        self.send_authed(request).await?;
        Ok(())
    }

    async fn delete_listing(&self, external_id: &str) -> Result<()> {
        let request = self
            .client
            .delete(format!("{}/api/v1/products/{}", self.base_url, external_id));
        self.send_authed(request).await?;
        Ok(())
    }

    async fn mark_as_sold(&self, external_id: &str) -> Result<()> {
        let request = self
            .client
            .put(format!("{}/api/v1/products/{}", self.base_url, external_id))
            .json(&json!({ "status": "sold" }));
        self.send_authed(request).await?;
        Ok(())
    }

    async fn check_listing_status(&self, external_id: &str) -> Result<RemoteStatus> {
        let request = self
            .client
            .get(format!("{}/api/v1/products/{}", self.base_url, external_id));
        match self.send_authed(request).await {
            Ok(response) => {
                let product: ShopProduct = response
                    .json()
                    .await
                    .map_err(|e| SyncError::from_request(e, Platform::Depop))?;
                Ok(map_status(product.status.as_deref()))
            }
            Err(SyncError::NotFound(_)) => Ok(RemoteStatus::Deleted),
            Err(e) => Err(e),
        }
    }

    async fn fetch_sales(&self) -> Result<Vec<RemoteSale>> {
        let request = self.client.get(format!("{}/api/v1/sales", self.base_url));
        let response = self.send_authed(request).await?;
        let feed: SalesFeedResponse = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Depop))?;
        Ok(feed
            .sales
            .into_iter()
            .map(|s| RemoteSale {
                external_id: s.product_id,
                sale_price: s.amount,
                sold_at: s.sold_at,
            })
            .collect())
    }

    fn sold_signal(&self) -> SoldSignal {
        SoldSignal::SalesFeed
    }
}
