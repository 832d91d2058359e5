//! Facebook Marketplace adapter (authenticated web API session)
//!
//! Sold detection: listing availability.

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

pub struct FacebookAdapter {
    client: reqwest::Client,
    email: Option<String>,
    password: Option<String>,
    pub(crate) base_url: String,
    timeout: Duration,
    session_token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ListingPage {
    listings: Vec<MarketplaceListing>,
}

#[derive(Debug, Deserialize)]
struct MarketplaceListing {
    listing_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    price: f64,
    /// "in stock" while listed, "sold" or "out of stock" afterwards
    #[serde(default)]
    availability: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    image_urls: Vec<String>,
    #[serde(default)]
    category: Option<String>,
}

impl FacebookAdapter {
    pub fn new(credentials: &SessionCredentials, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            email: credentials.email.clone(),
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
            .ok_or(SyncError::Authentication(Platform::FacebookMarketplace))
    }

    async fn send_authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.session().await?;
        let response = builder
            .timeout(self.timeout)
            .header("Cookie", format!("session={}", token))
            .send()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::FacebookMarketplace))?;
        check_status(response).await
    }

    fn listing_payload(&self, product: &Product) -> serde_json::Value {
        json!({
            "title": product.title,
            "description": product.description,
            "price": product.price,
            "category": product.category,
            "condition": product.condition,
            "brand": product.brand,
            "image_urls": product.images,
            "availability": "in stock",
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SyncError::Authentication(Platform::FacebookMarketplace))
        }
        StatusCode::NOT_FOUND => Err(SyncError::NotFound("listing".to_string())),
        StatusCode::BAD_REQUEST => {
            let reason = response.text().await.unwrap_or_default();
            Err(SyncError::Rejected {
                platform: Platform::FacebookMarketplace,
                reason,
            })
        }
        status => Err(SyncError::HttpStatus(status)),
    }
}

fn map_availability(availability: Option<&str>) -> RemoteStatus {
    match availability {
        Some("sold") | Some("out of stock") => RemoteStatus::Sold,
        Some("deleted") => RemoteStatus::Deleted,
        _ => RemoteStatus::Active,
    }
}

impl From<MarketplaceListing> for RemoteListing {
    fn from(l: MarketplaceListing) -> Self {
        let status = map_availability(l.availability.as_deref());
        RemoteListing {
            external_id: l.listing_id,
            title: l.title,
            description: l.description,
            price: l.price,
            url: l.permalink,
            status,
            images: l.image_urls,
            category: l.category,
            size: None,
            condition: None,
            brand: None,
        }
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> Platform {
        Platform::FacebookMarketplace
    }

    async fn authenticate(&self) -> Result<()> {
        let (email, password) = match (&self.email, &self.password) {
            (Some(e), Some(p)) => (e, p),
            _ => return Err(SyncError::Authentication(Platform::FacebookMarketplace)),
        };

        let response = self
            .client
            .post(format!("{}/api/login", self.base_url))
            .timeout(self.timeout)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::FacebookMarketplace))?;

        if !response.status().is_success() {
            return Err(SyncError::Authentication(Platform::FacebookMarketplace));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::FacebookMarketplace))?;
        *self.session_token.write().await = Some(login.session_id);
        log::info!("Authenticated with facebook marketplace");
        Ok(())
    }

    async fn list_listings(&self) -> Result<Vec<RemoteListing>> {
        let request = self
            .client
            .get(format!("{}/api/marketplace/listings", self.base_url));
        let response = self.send_authed(request).await?;
        let page: ListingPage = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::FacebookMarketplace))?;
        Ok(page.listings.into_iter().map(Into::into).collect())
    }

    async fn create_listing(&self, product: &Product) -> Result<String> {
        let request = self
            .client
            .post(format!("{}/api/marketplace/listings", self.base_url))
            .json(&self.listing_payload(product));
        let response = self.send_authed(request).await?;
        let created: MarketplaceListing = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::FacebookMarketplace))?;
        log::info!("Created facebook listing {}", created.listing_id);
        Ok(created.listing_id)
    }

    async fn update_listing(&self, external_id: &str, product: &Product) -> Result<()> {
        let request = self
            .client
            .put(format!(
                "{}/api/marketplace/listings/{}",
                self.base_url, external_id
            ))
            .json(&self.listing_payload(product));
        self.send_authed(request).await?;
        Ok(())
    }

    async fn delete_listing(&self, external_id: &str) -> Result<()> {
        let request = self.client.delete(format!(
            "{}/api/marketplace/listings/{}",
            self.base_url, external_id
        ));
        self.send_authed(request).await?;
        Ok(())
    }

    async fn mark_as_sold(&self, external_id: &str) -> Result<()> {
        let request = self
            .client
            .put(format!(
                "{}/api/marketplace/listings/{}",
                self.base_url, external_id
            ))
            .json(&json!({ "availability": "sold" }));
        self.send_authed(request).await?;
        Ok(())
    }

    async fn check_listing_status(&self, external_id: &str) -> Result<RemoteStatus> {
        let request = self.client.get(format!(
            "{}/api/marketplace/listings/{}",
            self.base_url, external_id
        ));
        match self.send_authed(request).await {
            Ok(response) => {
                let listing: MarketplaceListing = response
                    .json()
                    .await
                    .map_err(|e| SyncError::from_request(e, Platform::FacebookMarketplace))?;
                Ok(map_availability(listing.availability.as_deref()))
            }
            Err(SyncError::NotFound(_)) => Ok(RemoteStatus::Deleted),
            Err(e) => Err(e),
        }
    }

    async fn fetch_sales(&self) -> Result<Vec<RemoteSale>> {
        // Marketplace exposes no seller sales feed; sold listings are
        // surfaced through availability instead.
        Ok(Vec::new())
    }

    fn sold_signal(&self) -> SoldSignal {
        SoldSignal::ListingStatus
    }
}
