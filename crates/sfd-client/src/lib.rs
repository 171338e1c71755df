//! Typed clients for the marketplace and forum endpoints.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde_json::json;
use sfd_core::{ItemDetail, ItemId, PaymentsPage, UserId};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "sfd-client";

/// Connection settings shared by every remote call.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_url: String,
    pub forum_url: String,
    /// Attached verbatim as the `Authorization` header, no scheme prefix.
    pub token: String,
    pub timeout: Duration,
}

impl ApiConfig {
    /// Public detail URL of a sold item, also embedded in outreach messages.
    pub fn item_url(&self, item_id: &ItemId) -> String {
        format!("{}/{}", self.api_url, item_id)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Transport surface over the three remote endpoints the daemon touches.
///
/// The passes are generic over this trait; tests substitute a scripted fake.
#[async_trait]
pub trait LztApi: Send + Sync {
    /// `GET {api_url}/user/payments?type=sold_item&page=<n>`.
    async fn sold_payments_page(&self, page: u32) -> Result<PaymentsPage, ApiError>;

    /// `GET {api_url}/{item_id}`.
    async fn item_detail(&self, item_id: &ItemId) -> Result<ItemDetail, ApiError>;

    /// `POST {forum_url}/conversations`. Returns the raw response status;
    /// the caller decides what counts as delivered.
    async fn send_conversation(
        &self,
        recipient_id: UserId,
        message_body: &str,
    ) -> Result<u16, ApiError>;
}

/// Production implementation backed by reqwest.
#[derive(Debug)]
pub struct HttpApi {
    config: ApiConfig,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, &self.config.token)
            .header(header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl LztApi for HttpApi {
    async fn sold_payments_page(&self, page: u32) -> Result<PaymentsPage, ApiError> {
        let url = format!("{}/user/payments", self.config.api_url);
        self.get_json(
            &url,
            &[
                ("type", "sold_item".to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    async fn item_detail(&self, item_id: &ItemId) -> Result<ItemDetail, ApiError> {
        let url = self.config.item_url(item_id);
        self.get_json(&url, &[]).await
    }

    async fn send_conversation(
        &self,
        recipient_id: UserId,
        message_body: &str,
    ) -> Result<u16, ApiError> {
        let url = format!("{}/conversations", self.config.forum_url);
        let resp = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, &self.config.token)
            .json(&json!({
                "recipient_id": recipient_id,
                "message_body": message_body,
                "is_group": false,
            }))
            .send()
            .await?;
        Ok(resp.status().as_u16())
    }
}

/// Fixed inter-request delay enforcing the remote rate limit.
///
/// Wrappers pace immediately after every outbound call, so on the
/// single-threaded driver at least one full delay separates any two
/// requests. There is no backoff beyond this floor.
#[derive(Debug, Clone, Copy)]
pub struct RequestPacer {
    delay: Duration,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub async fn pace(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Consumer-driven walker over the sold-items pages.
///
/// Pages ascend from 1. The walk ends for good at the first sale older than
/// `since_ts` (the stream is newest-first), an empty payments mapping, an
/// API error (partial result acceptable), or the defensive page cap.
pub struct SoldItemsPager<'a, A: LztApi> {
    api: &'a A,
    pacer: RequestPacer,
    since_ts: i64,
    max_pages: u32,
    page: u32,
    done: bool,
}

impl<'a, A: LztApi> SoldItemsPager<'a, A> {
    pub fn new(api: &'a A, pacer: RequestPacer, since_ts: i64, max_pages: u32) -> Self {
        Self {
            api,
            pacer,
            since_ts,
            max_pages,
            page: 1,
            done: false,
        }
    }

    /// Item ids of the next page that are still inside the window, or `None`
    /// once the walk is over.
    pub async fn next_page(&mut self) -> Option<Vec<ItemId>> {
        if self.done {
            return None;
        }
        if self.page > self.max_pages {
            warn!(max_pages = self.max_pages, "sold-items walk hit the page cap");
            self.done = true;
            return None;
        }

        let result = self.api.sold_payments_page(self.page).await;
        self.pacer.pace().await;
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(page = self.page, error = %err, "failed to fetch sold-items page");
                self.done = true;
                return None;
            }
        };
        if page.is_empty() {
            self.done = true;
            return None;
        }

        let mut item_ids = Vec::new();
        for sale in page.sales() {
            if sale.operation_date < self.since_ts {
                self.done = true;
                break;
            }
            if let Some(item_id) = &sale.item_id {
                item_ids.push(item_id.clone());
            }
        }
        self.page += 1;
        Some(item_ids)
    }

    /// Drain the remaining pages into one list.
    pub async fn collect(mut self) -> Vec<ItemId> {
        let mut all = Vec::new();
        while let Some(mut batch) = self.next_page().await {
            all.append(&mut batch);
        }
        all
    }
}

/// `item.buyer.user_id` for one sold item, or `None` when the detail call
/// fails or the field chain is absent. Paces after the request.
pub async fn fetch_buyer<A: LztApi>(
    api: &A,
    pacer: &RequestPacer,
    item_id: &ItemId,
) -> Option<UserId> {
    let result = api.item_detail(item_id).await;
    pacer.pace().await;
    match result {
        Ok(detail) => {
            let user_id = detail.buyer_user_id();
            if user_id.is_none() {
                debug!(%item_id, "item detail has no buyer user id");
            }
            user_id
        }
        Err(err) => {
            warn!(%item_id, error = %err, "failed to fetch item detail");
            None
        }
    }
}

/// Substitute the item link into the outreach template.
pub fn render_message(template: &str, item_url: &str) -> String {
    template.replace("{item_url}", item_url)
}

/// Send one review-request conversation. True only on HTTP 200; any other
/// status or a transport error is a failure the caller may retry on a later
/// tick. Paces before returning, whatever the outcome.
pub async fn send_feedback_request<A: LztApi>(
    api: &A,
    pacer: &RequestPacer,
    recipient_id: UserId,
    message_body: &str,
) -> bool {
    let result = api.send_conversation(recipient_id, message_body).await;
    pacer.pace().await;
    match result {
        Ok(200) => true,
        Ok(status) => {
            warn!(recipient_id, status, "conversation send rejected");
            false
        }
        Err(err) => {
            warn!(recipient_id, error = %err, "conversation send failed");
            false
        }
    }
}

/// Credentials for the one-shot OAuth password grant.
#[derive(Debug, Clone)]
pub struct PasswordGrant {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

/// `POST {forum_url}/oauth/token` and return the status plus response body
/// for the operator to inspect. Minting a token is interactive; no retry.
pub async fn request_password_grant(
    forum_url: &str,
    timeout: Duration,
    grant: &PasswordGrant,
) -> anyhow::Result<(u16, serde_json::Value)> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("building reqwest client")?;
    let resp = client
        .post(format!("{forum_url}/oauth/token"))
        .json(&json!({
            "grant_type": "password",
            "username": grant.username,
            "password": grant.password,
            "client_id": grant.client_id,
            "client_secret": grant.client_secret,
            "scope": grant.scope,
        }))
        .send()
        .await
        .context("requesting oauth token")?;

    let status = resp.status().as_u16();
    let body = resp
        .json::<serde_json::Value>()
        .await
        .unwrap_or(serde_json::Value::Null);
    Ok((status, body))
}
