//! ConvertKit v3 API client.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{TagOutcome, TaggingService};
use crate::config::ConvertKitConfig;
use crate::error::TaggingError;

#[derive(Debug, Deserialize)]
struct SubscribersResponse {
    #[serde(default)]
    subscribers: Vec<Subscriber>,
}

#[derive(Debug, Deserialize)]
struct Subscriber {
    id: u64,
}

#[derive(Serialize)]
struct SubscribeBody<'a> {
    api_key: &'a str,
    api_secret: &'a str,
    email: &'a str,
}

/// Tags and subscribes members through ConvertKit.
pub struct ConvertKitClient {
    config: ConvertKitConfig,
    client: reqwest::Client,
}

impl ConvertKitClient {
    pub fn new(config: ConvertKitConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v3/{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Id of the subscriber with this address, if any.
    async fn find_subscriber(&self, email: &str) -> Result<Option<u64>, TaggingError> {
        let endpoint = self.api_url("subscribers");
        let resp = self
            .client
            .get(&endpoint)
            .query(&[
                ("api_secret", self.config.api_secret.expose_secret()),
                ("email_address", email),
            ])
            .send()
            .await
            .map_err(|e| TaggingError::RequestFailed {
                endpoint: "subscribers".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TaggingError::Status {
                endpoint: "subscribers".into(),
                status,
                body,
            });
        }

        let parsed: SubscribersResponse = resp
            .json()
            .await
            .map_err(|e| TaggingError::InvalidResponse(e.to_string()))?;
        Ok(parsed.subscribers.first().map(|s| s.id))
    }

    async fn subscribe(&self, path: &str, email: &str) -> Result<(), TaggingError> {
        let body = SubscribeBody {
            api_key: self.config.api_key.expose_secret(),
            api_secret: self.config.api_secret.expose_secret(),
            email,
        };
        let resp = self
            .client
            .post(self.api_url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| TaggingError::RequestFailed {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TaggingError::Status {
                endpoint: path.to_string(),
                status,
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TaggingService for ConvertKitClient {
    async fn tag_member(&self, email: &str) -> Result<TagOutcome, TaggingError> {
        match self.find_subscriber(email).await? {
            Some(subscriber_id) => {
                debug!(subscriber_id, "Tagging existing subscriber");
                self.subscribe(&format!("tags/{}/subscribe", self.config.tag_id), email)
                    .await?;
                info!("Subscriber tagged");
                Ok(TagOutcome::Tagged)
            }
            None => {
                self.subscribe(&format!("forms/{}/subscribe", self.config.form_id), email)
                    .await?;
                info!("New subscriber added through form");
                Ok(TagOutcome::Subscribed)
            }
        }
    }
}
