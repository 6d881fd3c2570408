//! Follower registry: who copies whom.
//!
//! The authoritative mapping lives in an external service; the relayer only
//! queries it at broadcast time and mirrors follow/unfollow calls into it.

use async_trait::async_trait;
use copybot_types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Request(String),

    #[error("registry returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait FollowerRegistry: Send + Sync {
    /// Current followers of a broadcaster, in registry order.
    async fn followers_of(&self, broadcaster: &Address) -> Result<Vec<Address>, RegistryError>;

    async fn follow(&self, user: &Address, broadcaster: &Address) -> Result<(), RegistryError>;

    async fn unfollow(&self, user: &Address) -> Result<(), RegistryError>;
}

#[derive(Deserialize)]
struct FollowersResponse {
    followers: Vec<Address>,
}

/// Registry service client.
pub struct HttpFollowerRegistry {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFollowerRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl FollowerRegistry for HttpFollowerRegistry {
    async fn followers_of(&self, broadcaster: &Address) -> Result<Vec<Address>, RegistryError> {
        let url = format!("{}/followers/{}", self.base_url, broadcaster);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Request(e.to_string()))?;
        let response = Self::check(response).await?;
        let parsed: FollowersResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Request(e.to_string()))?;
        Ok(parsed.followers)
    }

    async fn follow(&self, user: &Address, broadcaster: &Address) -> Result<(), RegistryError> {
        let url = format!("{}/follow", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "user": user,
                "broadcaster": broadcaster,
            }))
            .send()
            .await
            .map_err(|e| RegistryError::Request(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn unfollow(&self, user: &Address) -> Result<(), RegistryError> {
        let url = format!("{}/follow/{}", self.base_url, user);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Request(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }
}

/// In-memory registry for tests and single-process deployments.
#[derive(Default)]
pub struct StaticRegistry {
    following: RwLock<HashMap<Address, Address>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FollowerRegistry for StaticRegistry {
    async fn followers_of(&self, broadcaster: &Address) -> Result<Vec<Address>, RegistryError> {
        let following = self.following.read().await;
        let mut followers: Vec<Address> = following
            .iter()
            .filter(|(_, b)| *b == broadcaster)
            .map(|(u, _)| u.clone())
            .collect();
        followers.sort();
        Ok(followers)
    }

    async fn follow(&self, user: &Address, broadcaster: &Address) -> Result<(), RegistryError> {
        self.following
            .write()
            .await
            .insert(user.clone(), broadcaster.clone());
        Ok(())
    }

    async fn unfollow(&self, user: &Address) -> Result<(), RegistryError> {
        self.following.write().await.remove(user);
        Ok(())
    }
}
