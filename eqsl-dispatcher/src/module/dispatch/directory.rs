///! Callsign directory lookup
///!
///! Resolves callsigns to contact details through the platform's
///! directory service. Results, including misses, sit in a time-bounded
///! in-memory cache so one run never asks twice for the same call.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::RwLock;

use eqsl_common::interfaces::DirectoryLookup;
use eqsl_common::types::DirectoryEntry;

pub struct HttpDirectoryLookup {
    client: Client,
    base_url: String,
    ttl: chrono::Duration,
    cache: RwLock<HashMap<String, (DateTime<Utc>, Option<DirectoryEntry>)>>,
}

impl HttpDirectoryLookup {
    pub fn new(base_url: impl Into<String>, timeout: Duration, ttl_secs: i64) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .user_agent("eqsl-dispatcher/0.1")
                .build()
                .expect("Failed to build reqwest client"),
            base_url: base_url.into(),
            ttl: chrono::Duration::seconds(ttl_secs),
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn fetch(&self, callsign: &str) -> Result<Option<DirectoryEntry>> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), callsign);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Directory request for {callsign} failed"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let entry: DirectoryEntry = response
            .error_for_status()
            .context("Directory returned an error status")?
            .json()
            .await
            .context("Failed to decode directory response")?;

        Ok(Some(entry))
    }
}

#[async_trait]
impl DirectoryLookup for HttpDirectoryLookup {
    async fn lookup(&self, callsign: &str) -> Result<Option<DirectoryEntry>> {
        let key = callsign.trim().to_ascii_uppercase();
        let now = Utc::now();

        if let Some((fetched_at, entry)) = self.cache.read().await.get(&key) {
            if now - *fetched_at < self.ttl {
                return Ok(entry.clone());
            }
        }

        let entry = self.fetch(&key).await?;
        self.cache.write().await.insert(key, (now, entry.clone()));
        Ok(entry)
    }
}
