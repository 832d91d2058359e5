//! Vinted adapter (authenticated web API session)
//!
//! Vinted closes sold items itself, so `mark_as_sold` delegates to
//! `delete_listing`. Sold detection: listing status.

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

pub struct VintedAdapter {
    client: reqwest::Client,
    email: Option<String>,
    password: Option<String>,
    pub(crate) base_url: String,
    timeout: Duration,
    session_token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct WardrobeResponse {
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct ItemResponse {
    item: Item,
}

#[derive(Debug, Deserialize)]
struct Item {
    id: serde_json::Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    photos: Vec<Photo>,
    #[serde(default)]
    brand_title: Option<String>,
    #[serde(default)]
    size_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    orders: Vec<Order>,
}

#[derive(Debug, Deserialize)]
struct Order {
    item_id: serde_json::Value,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    completed_at: Option<String>,
}

/// Vinted item ids arrive as numbers or strings depending on the endpoint
fn id_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl VintedAdapter {
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

    /// Current session token, logging in first if there is none yet
    async fn session(&self) -> Result<String> {
        if let Some(token) = self.session_token.read().await.clone() {
            return Ok(token);
        }
        self.authenticate().await?;
        self.session_token
            .read()
            .await
            .clone()
            .ok_or(SyncError::Authentication(Platform::Vinted))
    }

    async fn send_authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.session().await?;
        let response = builder
            .timeout(self.timeout)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Vinted))?;
        check_status(response).await
    }

    fn item_payload(&self, product: &Product) -> serde_json::Value {
        json!({
            "item": {
                "title": product.title,
                "description": product.description,
                "price": product.price,
                "catalog_title": product.category,
                "size_title": product.size,
                "brand_title": product.brand,
                "status_title": product.condition,
                "photo_urls": product.images,
            }
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SyncError::Authentication(Platform::Vinted))
        }
        StatusCode::NOT_FOUND => Err(SyncError::NotFound("item".to_string())),
        StatusCode::UNPROCESSABLE_ENTITY => {
            let reason = response.text().await.unwrap_or_default();
            Err(SyncError::Rejected {
                platform: Platform::Vinted,
                reason,
            })
        }
        status => Err(SyncError::HttpStatus(status)),
    }
}

fn map_status(status: Option<&str>) -> RemoteStatus {
    match status {
        Some("sold") | Some("closed") => RemoteStatus::Sold,
        Some("deleted") | Some("hidden") => RemoteStatus::Deleted,
        _ => RemoteStatus::Active,
    }
}

impl From<Item> for RemoteListing {
    fn from(item: Item) -> Self {
        let status = map_status(item.status.as_deref());
        RemoteListing {
            external_id: id_string(&item.id),
            title: item.title,
            description: item.description,
            price: item.price,
            url: item.url,
            status,
            images: item.photos.into_iter().map(|p| p.url).collect(),
            category: None,
            size: item.size_title,
            condition: None,
            brand: item.brand_title,
        }
    }
}

#[async_trait]
impl PlatformAdapter for VintedAdapter {
    fn platform(&self) -> Platform {
        Platform::Vinted
    }

    async fn authenticate(&self) -> Result<()> {
        let (email, password) = match (&self.email, &self.password) {
            (Some(e), Some(p)) => (e, p),
            _ => return Err(SyncError::Authentication(Platform::Vinted)),
        };

        let response = self
            .client
            .post(format!("{}/api/v2/sessions", self.base_url))
            .timeout(self.timeout)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Vinted))?;

        if !response.status().is_success() {
            return Err(SyncError::Authentication(Platform::Vinted));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Vinted))?;
        *self.session_token.write().await = Some(session.token);
        log::info!("Authenticated with vinted");
        Ok(())
    }

    async fn list_listings(&self) -> Result<Vec<RemoteListing>> {
        let request = self
            .client
            .get(format!("{}/api/v2/wardrobe/items", self.base_url));
        let response = self.send_authed(request).await?;
        let wardrobe: WardrobeResponse = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Vinted))?;
        Ok(wardrobe.items.into_iter().map(Into::into).collect())
    }

    async fn create_listing(&self, product: &Product) -> Result<String> {
        let request = self
            .client
            .post(format!("{}/api/v2/items", self.base_url))
            .json(&self.item_payload(product));
        let response = self.send_authed(request).await?;
        let created: ItemResponse = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Vinted))?;
        let id = id_string(&created.item.id);
        log::info!("Created vinted item {}", id);
        Ok(id)
    }

    async fn update_listing(&self, external_id: &str, product: &Product) -> Result<()> {
        let request = self
            .client
            .put(format!("{}/api/v2/items/{}", self.base_url, external_id))
            .json(&self.item_payload(product));
        self.send_authed(request).await?;
        Ok(())
    }

    async fn delete_listing(&self, external_id: &str) -> Result<()> {
        let request = self
            .client
            .delete(format!("{}/api/v2/items/{}", self.base_url, external_id));
        self.send_authed(request).await?;
        Ok(())
    }

    async fn mark_as_sold(&self, external_id: &str) -> Result<()> {
        // The platform flips sold state itself on purchase; closing the
        // listing is the only action available to the seller.
        self.delete_listing(external_id).await
    }

    async fn check_listing_status(&self, external_id: &str) -> Result<RemoteStatus> {
        let request = self
            .client
            .get(format!("{}/api/v2/items/{}", self.base_url, external_id));
        match self.send_authed(request).await {
            Ok(response) => {
                let item: ItemResponse = response
                    .json()
                    .await
                    .map_err(|e| SyncError::from_request(e, Platform::Vinted))?;
                Ok(map_status(item.item.status.as_deref()))
            }
            Err(SyncError::NotFound(_)) => Ok(RemoteStatus::Deleted),
            Err(e) => Err(e),
        }
    }

    async fn fetch_sales(&self) -> Result<Vec<RemoteSale>> {
        let request = self
            .client
            .get(format!("{}/api/v2/orders", self.base_url))
            .query(&[("status", "completed")]);
        let response = self.send_authed(request).await?;
        let orders: OrdersResponse = response
            .json()
            .await
            .map_err(|e| SyncError::from_request(e, Platform::Vinted))?;
        Ok(orders
            .orders
            .into_iter()
            .map(|o| RemoteSale {
                external_id: id_string(&o.item_id),
                sale_price: o.price,
                sold_at: o.completed_at,
            })
            .collect())
    }

    fn sold_signal(&self) -> SoldSignal {
        SoldSignal::ListingStatus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_with_mock(mock_uri: &str) -> VintedAdapter {
        let credentials = SessionCredentials {
            email: Some("seller@example.com".to_string()),
            password: Some("secret".to_string()),
            base_url: mock_uri.to_string(),
        };
        VintedAdapter::new(&credentials, 5)
    }

    async fn mock_login(mock_server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v2/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "session-abc"
            })))
            .mount(mock_server)
            .await;
    }

    #[tokio::test]
    async fn authenticate_stores_session_token() {
        let mock_server = MockServer::start().await;
        let adapter = adapter_with_mock(&mock_server.uri());
        mock_login(&mock_server).await;

        adapter.authenticate().await.unwrap();
        assert_eq!(adapter.session().await.unwrap(), "session-abc");
    }

    #[tokio::test]
    async fn missing_credentials_fail_authentication() {
        let credentials = SessionCredentials {
            email: None,
            password: None,
            base_url: "http://unused.invalid".to_string(),
        };
        let adapter = VintedAdapter::new(&credentials, 5);
        let err = adapter.authenticate().await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication(Platform::Vinted)));
    }

    #[tokio::test]
    async fn bad_login_is_authentication_failure() {
        let mock_server = MockServer::start().await;
        let adapter = adapter_with_mock(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/api/v2/sessions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let err = adapter.authenticate().await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication(Platform::Vinted)));
    }

    #[tokio::test]
    async fn list_listings_logs_in_lazily_and_parses_items() {
        let mock_server = MockServer::start().await;
        let adapter = adapter_with_mock(&mock_server.uri());
        mock_login(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/wardrobe/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "id": 817263,
                    "title": "Wool Coat",
                    "price": 32.5,
                    "status": "active",
                    "photos": [{ "url": "https://img.vinted/1.jpg" }],
                    "brand_title": "Acme"
                }]
            })))
            .mount(&mock_server)
            .await;

        let listings = adapter.list_listings().await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].external_id, "817263");
        assert_eq!(listings[0].images, vec!["https://img.vinted/1.jpg"]);
    }

    #[tokio::test]
    async fn mark_as_sold_deletes_the_listing() {
        let mock_server = MockServer::start().await;
        let adapter = adapter_with_mock(&mock_server.uri());
        mock_login(&mock_server).await;

        Mock::given(method("DELETE"))
            .and(path("/api/v2/items/817263"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        adapter.mark_as_sold("817263").await.unwrap();
    }

    #[tokio::test]
    async fn closed_item_reads_as_sold() {
        let mock_server = MockServer::start().await;
        let adapter = adapter_with_mock(&mock_server.uri());
        mock_login(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/items/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "item": { "id": 5, "status": "closed" }
            })))
            .mount(&mock_server)
            .await;

        let status = adapter.check_listing_status("5").await.unwrap();
        assert_eq!(status, RemoteStatus::Sold);
    }
}
