//! Marktplaats adapter (official REST API, OAuth2 bearer token)
//!
//! Token acquisition happens outside this process; the adapter only carries
//! the access token. Sold detection: listing status.

use crate::config::TokenCredentials;
use crate::error::{Result, SyncError};
use crate::models::{Platform, Product, RemoteStatus};
use crate::platforms::{PlatformAdapter, RemoteListing, RemoteSale, SoldSignal};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

pub struct MarktplaatsAdapter {
    client: reqwest::Client,
    access_token: Option<String>,
    pub(crate) base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct AdvertisementList {
    advertisements: Vec<Advertisement>,
}

#[derive(Debug, Deserialize)]
struct Advertisement {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    price: AdPrice,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct AdPrice {
    /// Price in euro cents
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct CreatedAdvertisement {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SalesList {
    sales: Vec<SaleEntry>,
}

#[derive(Debug, Deserialize)]
struct SaleEntry {
    #[serde(rename = "advertisementId")]
    advertisement_id: String,
    #[serde(default)]
    price: Option<AdPrice>,
    #[serde(rename = "soldAt", default)]
    sold_at: Option<String>,
}

impl MarktplaatsAdapter {
    pub fn new(credentials: &TokenCredentials, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: credentials.access_token.clone(),
            base_url: credentials.base_url.clone(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn token(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .ok_or(SyncError::Authentication(Platform::Marktplaats))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = format!("{}{}", self.base_url, path);
        Ok(self
            .client
            .request(method, url)
            .timeout(self.timeout)
            .bearer_auth(self.token()?))
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Marktplaats))?;
        check_status(response).await
    }

    fn ad_payload(&self, product: &Product) -> serde_json::Value {
        let mut attributes = HashMap::new();
        if let Some(size) = &product.size {
            attributes.insert("size", size.clone());
        }
        if let Some(condition) = &product.condition {
            attributes.insert("condition", condition.clone());
        }
        if let Some(brand) = &product.brand {
            attributes.insert("brand", brand.clone());
        }
        if let Some(color) = &product.color {
            attributes.insert("color", color.clone());
        }

        json!({
            "title": product.title,
            "description": product.description,
            "price": {
                // Marktplaats prices are euro cents
                "amount": (product.price * 100.0).round() as i64,
                "currency": "EUR",
            },
            "categoryId": product.category.clone().unwrap_or_default(),
            "attributes": attributes,
            "images": product.images,
        })
    }
}

/// Map Marktplaats' HTTP errors onto the orchestrator's error kinds
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SyncError::Authentication(Platform::Marktplaats))
        }
        StatusCode::NOT_FOUND => Err(SyncError::NotFound("advertisement".to_string())),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            let reason = response.text().await.unwrap_or_default();
            Err(SyncError::Rejected {
                platform: Platform::Marktplaats,
                reason,
            })
        }
        status => Err(SyncError::HttpStatus(status)),
    }
}

fn map_status(status: Option<&str>) -> RemoteStatus {
    match status {
        Some("sold") => RemoteStatus::Sold,
        Some("deleted") | Some("removed") => RemoteStatus::Deleted,
        // Unknown states are treated as still listed; a wrong guess here
        // must not fabricate a sale.
        _ => RemoteStatus::Active,
    }
}

impl From<Advertisement> for RemoteListing {
    fn from(ad: Advertisement) -> Self {
        RemoteListing {
            external_id: ad.id,
            title: ad.title,
            description: ad.description,
            price: ad.price.amount as f64 / 100.0,
            url: ad.url,
            status: map_status(ad.status.as_deref()),
            images: ad.images,
            category: None,
            size: ad.attributes.get("size").cloned(),
            condition: ad.attributes.get("condition").cloned(),
            brand: ad.attributes.get("brand").cloned(),
        }
    }
}

#[async_trait]
impl PlatformAdapter for MarktplaatsAdapter {
    fn platform(&self) -> Platform {
        Platform::Marktplaats
    }

    async fn authenticate(&self) -> Result<()> {
        // Bearer token is provisioned externally; a cheap profile call
        // verifies it still works.
        let request = self.request(reqwest::Method::GET, "/me")?;
        self.send(request).await?;
        Ok(())
    }

    async fn list_listings(&self) -> Result<Vec<RemoteListing>> {
        let request = self.request(reqwest::Method::GET, "/advertisements")?;
        let response = self.send(request).await?;
        let list: AdvertisementList = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Marktplaats))?;
        Ok(list.advertisements.into_iter().map(Into::into).collect())
    }

    async fn create_listing(&self, product: &Product) -> Result<String> {
        let request = self
            .request(reqwest::Method::POST, "/advertisements")?
            .json(&self.ad_payload(product));
        let response = self.send(request).await?;
        let created: CreatedAdvertisement = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Marktplaats))?;
        log::info!("Created marktplaats advertisement {}", created.id);
        Ok(created.id)
    }

    async fn update_listing(&self, external_id: &str, product: &Product) -> Result<()> {
        let path = format!("/advertisements/{}", external_id);
        let request = self
            .request(reqwest::Method::PUT, &path)?
            .json(&self.ad_payload(product));
        self.send(request).await?;
        Ok(())
    }

    async fn delete_listing(&self, external_id: &str) -> Result<()> {
        let path = format!("/advertisements/{}", external_id);
        let request = self.request(reqwest::Method::DELETE, &path)?;
        self.send(request).await?;
        Ok(())
    }

    async fn mark_as_sold(&self, external_id: &str) -> Result<()> {
        let path = format!("/advertisements/{}/sold", external_id);
        let request = self.request(reqwest::Method::POST, &path)?;
        self.send(request).await?;
        Ok(())
    }

    async fn check_listing_status(&self, external_id: &str) -> Result<RemoteStatus> {
        let path = format!("/advertisements/{}", external_id);
        let request = self.request(reqwest::Method::GET, &path)?;
        match self.send(request).await {
            Ok(response) => {
                let ad: Advertisement = response
                    .json()
                    .await
                    .map_err(|e| SyncError::from_request(e, Platform::Marktplaats))?;
                Ok(map_status(ad.status.as_deref()))
            }
            // A vanished advertisement is a deleted listing, not a failure
            Err(SyncError::NotFound(_)) => Ok(RemoteStatus::Deleted),
            Err(e) => Err(e),
        }
    }

    async fn fetch_sales(&self) -> Result<Vec<RemoteSale>> {
        let request = self.request(reqwest::Method::GET, "/sales")?;
        let response = self.send(request).await?;
        let list: SalesList = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Marktplaats))?;
        Ok(list
            .sales
            .into_iter()
            .map(|s| RemoteSale {
                external_id: s.advertisement_id,
                sale_price: s.price.map(|p| p.amount as f64 / 100.0),
                sold_at: s.sold_at,
            })
            .collect())
    }

    fn sold_signal(&self) -> SoldSignal {
        SoldSignal::ListingStatus
    }
}
