///! File-backed stores
///!
///! JSON drop-folder implementations of the record store and blob store,
///! for running the dispatcher against an exported snapshot of the
///! platform's records. The upstream platform stays the system of
///! record; this is the transport format between the two.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use eqsl_common::interfaces::{BlobStore, RecordStore};
use eqsl_common::types::{ConfirmationRecord, EventTemplate, FailedAddressEntry};

/// One station registered on the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationEntry {
    pub station_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// On-disk layout of the record snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordFile {
    #[serde(default)]
    records: Vec<ConfirmationRecord>,
    #[serde(default)]
    events: Vec<EventTemplate>,
    #[serde(default)]
    stations: Vec<StationEntry>,
}

pub struct JsonRecordStore {
    records_path: PathBuf,
    failed_path: PathBuf,
    state: Mutex<RecordFile>,
    failed: Mutex<Vec<FailedAddressEntry>>,
}

impl JsonRecordStore {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {data_dir:?}"))?;

        let records_path = data_dir.join("records.json");
        let failed_path = data_dir.join("failed_addresses.json");

        let state: RecordFile = load_json(&records_path).await?;
        let failed: Vec<FailedAddressEntry> = load_json(&failed_path).await?;

        tracing::info!(
            "Loaded {} records, {} events, {} stations from {:?}",
            state.records.len(),
            state.events.len(),
            state.stations.len(),
            records_path
        );

        Ok(Self {
            records_path,
            failed_path,
            state: Mutex::new(state),
            failed: Mutex::new(failed),
        })
    }

    async fn persist_records(&self, state: &RecordFile) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).context("Failed to serialize records")?;
        fs::write(&self.records_path, json)
            .await
            .with_context(|| format!("Failed to write {:?}", self.records_path))
    }

    async fn persist_failed(&self, failed: &[FailedAddressEntry]) -> Result<()> {
        let json = serde_json::to_vec_pretty(failed)
            .context("Failed to serialize failed-address log")?;
        fs::write(&self.failed_path, json)
            .await
            .with_context(|| format!("Failed to write {:?}", self.failed_path))
    }
}

async fn load_json<T: Default + DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {path:?}"))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {path:?}"))
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn find_pending(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConfirmationRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|record| !record.sent && record.contact_timestamp >= since)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save(&self, record: &ConfirmationRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => state.records.push(record.clone()),
        }
        self.persist_records(&state).await
    }

    async fn event(&self, event_id: &str) -> Result<Option<EventTemplate>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .find(|event| event.event_id == event_id)
            .cloned())
    }

    async fn station_email(&self, station_id: &str) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state
            .stations
            .iter()
            .find(|station| station.station_id == station_id)
            .and_then(|station| station.email.clone()))
    }

    async fn record_failed_address(&self, entry: &FailedAddressEntry) -> Result<bool> {
        let mut failed = self.failed.lock().await;
        let known = failed.iter().any(|e| {
            e.contacted_callsign == entry.contacted_callsign && e.event_id == entry.event_id
        });
        if known {
            return Ok(false);
        }
        failed.push(entry.clone());
        self.persist_failed(&failed).await?;
        Ok(true)
    }
}

/// Blob storage under a plain directory; refs are paths relative to the
/// root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: &[u8], folder: &str) -> Result<String> {
        let dir = self.root.join(folder);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create blob folder {dir:?}"))?;

        let name = format!("{}.png", uuid::Uuid::now_v7().simple());
        fs::write(dir.join(&name), bytes)
            .await
            .with_context(|| format!("Failed to write blob {folder}/{name}"))?;
        Ok(format!("{folder}/{name}"))
    }

    async fn get(&self, url_ref: &str) -> Result<Vec<u8>> {
        fs::read(self.root.join(url_ref))
            .await
            .with_context(|| format!("Failed to read blob {url_ref}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("eqsl_storage_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn record(id: &str, sent: bool, days_ago: i64) -> ConfirmationRecord {
        ConfirmationRecord {
            id: id.to_string(),
            event_id: "E1".to_string(),
            destination_address: None,
            origin_station_id: "st-1".to_string(),
            contacted_callsign: "IU4ABC".to_string(),
            contact_timestamp: Utc::now() - chrono::Duration::days(days_ago),
            band: "20m".to_string(),
            mode: "SSB".to_string(),
            grid_locator: None,
            generated_image_ref: None,
            sent,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_pending_filters_sent_old_and_caps() {
        let store = JsonRecordStore::open(scratch_dir("pending")).await.unwrap();

        for rec in [
            record("fresh-1", false, 1),
            record("fresh-2", false, 2),
            record("fresh-3", false, 3),
            record("already-sent", true, 1),
            record("ancient", false, 90),
        ] {
            store.save(&rec).await.unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let pending = store.find_pending(cutoff, 2).await.unwrap();

        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|r| !r.sent));
        assert!(pending.iter().all(|r| r.contact_timestamp >= cutoff));
    }

    #[tokio::test]
    async fn test_save_updates_in_place_and_persists() {
        let dir = scratch_dir("save");
        let store = JsonRecordStore::open(&dir).await.unwrap();

        let mut rec = record("r1", false, 1);
        store.save(&rec).await.unwrap();

        rec.sent = true;
        rec.sent_at = Some(Utc.with_ymd_and_hms(2026, 6, 12, 18, 0, 0).unwrap());
        store.save(&rec).await.unwrap();

        // Reload from disk; the update must have replaced, not appended.
        let reopened = JsonRecordStore::open(&dir).await.unwrap();
        let state = reopened.state.lock().await;
        assert_eq!(state.records.len(), 1);
        assert!(state.records[0].sent);
    }

    #[tokio::test]
    async fn test_failed_address_log_is_unique_per_pair() {
        let dir = scratch_dir("failed");
        let store = JsonRecordStore::open(&dir).await.unwrap();

        let entry = FailedAddressEntry {
            contacted_callsign: "IU4ZZZ".to_string(),
            event_id: "E1".to_string(),
            event_name: "Contest Weekend".to_string(),
        };

        assert!(store.record_failed_address(&entry).await.unwrap());
        assert!(!store.record_failed_address(&entry).await.unwrap());

        // Same callsign under another event is a fresh entry
        let other_event = FailedAddressEntry { event_id: "E2".to_string(), ..entry.clone() };
        assert!(store.record_failed_address(&other_event).await.unwrap());

        // Survives a reopen
        let reopened = JsonRecordStore::open(&dir).await.unwrap();
        assert!(!reopened.record_failed_address(&entry).await.unwrap());
    }

    #[tokio::test]
    async fn test_blob_round_trip() {
        let blobs = FsBlobStore::new(scratch_dir("blobs"));

        let url_ref = blobs.put(b"png bytes", "eqsl").await.unwrap();
        assert!(url_ref.starts_with("eqsl/"));
        assert_eq!(blobs.get(&url_ref).await.unwrap(), b"png bytes");

        assert!(blobs.get("eqsl/missing.png").await.is_err());
    }
}
