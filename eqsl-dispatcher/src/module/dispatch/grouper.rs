///! Destination grouping
///!
///! Resolves where each pending record should go and buckets records by
///! address, in the order addresses are first seen. Records with no
///! resolvable destination are diverted to the failed-address log, once
///! per (callsign, event).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use regex::Regex;

use eqsl_common::interfaces::{AdminAlert, DirectoryLookup, RecordStore};
use eqsl_common::types::{ConfirmationRecord, EventTemplate, FailedAddressEntry};

/// Records bound for one destination address, in discovery order.
#[derive(Debug)]
pub struct DeliveryGroup {
    pub address: String,
    pub records: Vec<ConfirmationRecord>,
}

/// Strip portable prefixes and suffixes: the longest '/'-separated
/// segment is the base call ("EA8/IU4ABC/P" becomes "IU4ABC").
pub fn clean_callsign(raw: &str) -> String {
    raw.trim()
        .to_ascii_uppercase()
        .split('/')
        .max_by_key(|segment| segment.len())
        .unwrap_or("")
        .to_string()
}

fn is_plausible_address(address: &str) -> bool {
    let re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    re.is_match(address.trim())
}

pub struct RecipientGrouper {
    store: Arc<dyn RecordStore>,
    directory: Arc<dyn DirectoryLookup>,
    alerts: Arc<dyn AdminAlert>,
}

impl RecipientGrouper {
    pub fn new(
        store: Arc<dyn RecordStore>,
        directory: Arc<dyn DirectoryLookup>,
        alerts: Arc<dyn AdminAlert>,
    ) -> Self {
        Self { store, directory, alerts }
    }

    /// Resolve every record's destination and bucket them by address.
    /// Returns the groups plus the count of diverted records.
    pub async fn group(
        &self,
        records: Vec<ConfirmationRecord>,
        events: &HashMap<String, EventTemplate>,
    ) -> Result<(Vec<DeliveryGroup>, usize)> {
        let mut groups: Vec<DeliveryGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut unresolved = 0usize;

        for record in records {
            match self.resolve_address(&record).await {
                Some(address) => {
                    let slot = *index.entry(address.clone()).or_insert_with(|| {
                        groups.push(DeliveryGroup { address, records: Vec::new() });
                        groups.len() - 1
                    });
                    groups[slot].records.push(record);
                }
                None => {
                    unresolved += 1;
                    self.divert_unresolved(&record, events).await;
                }
            }
        }

        Ok((groups, unresolved))
    }

    /// Resolution precedence: the record's own address, then the origin
    /// station's registered email, then the directory entry of the
    /// cleaned callsign.
    async fn resolve_address(&self, record: &ConfirmationRecord) -> Option<String> {
        if let Some(address) = &record.destination_address {
            if is_plausible_address(address) {
                return Some(address.trim().to_ascii_lowercase());
            }
            tracing::warn!("Record {} carries malformed address {:?}", record.id, address);
        }

        match self.store.station_email(&record.origin_station_id).await {
            Ok(Some(address)) if is_plausible_address(&address) => {
                return Some(address.trim().to_ascii_lowercase());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(
                "Station lookup failed for {}: {}",
                record.origin_station_id,
                e
            ),
        }

        let base_call = clean_callsign(&record.contacted_callsign);
        match self.directory.lookup(&base_call).await {
            Ok(Some(entry)) => entry
                .email
                .filter(|address| is_plausible_address(address))
                .map(|address| address.trim().to_ascii_lowercase()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Directory lookup failed for {}: {}", base_call, e);
                None
            }
        }
    }

    async fn divert_unresolved(
        &self,
        record: &ConfirmationRecord,
        events: &HashMap<String, EventTemplate>,
    ) {
        let event_name = events
            .get(&record.event_id)
            .map(|event| event.event_name.clone())
            .unwrap_or_else(|| record.event_id.clone());

        let entry = FailedAddressEntry {
            contacted_callsign: clean_callsign(&record.contacted_callsign),
            event_id: record.event_id.clone(),
            event_name,
        };

        match self.store.record_failed_address(&entry).await {
            Ok(true) => {
                tracing::info!(
                    "No address for {} in event {}, alerting admins",
                    entry.contacted_callsign,
                    entry.event_id
                );
                self.alerts
                    .notify(
                        &format!(
                            "No email address found for {} ({})",
                            entry.contacted_callsign, entry.event_name
                        ),
                        "eqsl",
                    )
                    .await;
            }
            Ok(false) => tracing::debug!(
                "Address failure for {}/{} already on file",
                entry.contacted_callsign,
                entry.event_id
            ),
            Err(e) => tracing::warn!(
                "Failed to log address failure for {}: {}",
                entry.contacted_callsign,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use eqsl_common::types::DirectoryEntry;
    use std::sync::Mutex;

    #[test]
    fn test_clean_callsign_takes_longest_segment() {
        assert_eq!(clean_callsign("IU4ABC"), "IU4ABC");
        assert_eq!(clean_callsign("ea8/iu4abc"), "IU4ABC");
        assert_eq!(clean_callsign("EA8/IU4ABC/P"), "IU4ABC");
        assert_eq!(clean_callsign("IU4ABC/QRP"), "IU4ABC");
        assert_eq!(clean_callsign("  iw2nke/m "), "IW2NKE");
        assert_eq!(clean_callsign(""), "");
    }

    #[test]
    fn test_address_plausibility() {
        assert!(is_plausible_address("op@example.org"));
        assert!(!is_plausible_address("not-an-address"));
        assert!(!is_plausible_address("two@at@signs.org"));
        assert!(!is_plausible_address("no@tld"));
        assert!(!is_plausible_address(""));
    }

    struct StubStore {
        station_emails: HashMap<String, String>,
        failed: Mutex<Vec<FailedAddressEntry>>,
    }

    #[async_trait]
    impl RecordStore for StubStore {
        async fn find_pending(
            &self,
            _since: chrono::DateTime<Utc>,
            _limit: usize,
        ) -> Result<Vec<ConfirmationRecord>> {
            Ok(Vec::new())
        }

        async fn save(&self, _record: &ConfirmationRecord) -> Result<()> {
            Ok(())
        }

        async fn event(&self, _event_id: &str) -> Result<Option<EventTemplate>> {
            Ok(None)
        }

        async fn station_email(&self, station_id: &str) -> Result<Option<String>> {
            Ok(self.station_emails.get(station_id).cloned())
        }

        async fn record_failed_address(&self, entry: &FailedAddressEntry) -> Result<bool> {
            let mut failed = self.failed.lock().unwrap();
            if failed.iter().any(|e| {
                e.contacted_callsign == entry.contacted_callsign && e.event_id == entry.event_id
            }) {
                return Ok(false);
            }
            failed.push(entry.clone());
            Ok(true)
        }
    }

    struct StubDirectory {
        entries: HashMap<String, DirectoryEntry>,
    }

    #[async_trait]
    impl DirectoryLookup for StubDirectory {
        async fn lookup(&self, callsign: &str) -> Result<Option<DirectoryEntry>> {
            Ok(self.entries.get(callsign).cloned())
        }
    }

    #[derive(Default)]
    struct CountingAlert {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AdminAlert for CountingAlert {
        async fn notify(&self, message: &str, _channel: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn record(id: &str, callsign: &str, destination: Option<&str>) -> ConfirmationRecord {
        ConfirmationRecord {
            id: id.to_string(),
            event_id: "E1".to_string(),
            destination_address: destination.map(str::to_string),
            origin_station_id: "st-1".to_string(),
            contacted_callsign: callsign.to_string(),
            contact_timestamp: Utc::now(),
            band: "40m".to_string(),
            mode: "CW".to_string(),
            grid_locator: None,
            generated_image_ref: None,
            sent: false,
            sent_at: None,
        }
    }

    fn grouper(
        station_emails: HashMap<String, String>,
        entries: HashMap<String, DirectoryEntry>,
    ) -> (RecipientGrouper, Arc<StubStore>, Arc<CountingAlert>) {
        let store = Arc::new(StubStore { station_emails, failed: Mutex::new(Vec::new()) });
        let alerts = Arc::new(CountingAlert::default());
        let g = RecipientGrouper::new(
            store.clone(),
            Arc::new(StubDirectory { entries }),
            alerts.clone(),
        );
        (g, store, alerts)
    }

    fn events() -> HashMap<String, EventTemplate> {
        HashMap::from([(
            "E1".to_string(),
            EventTemplate {
                event_id: "E1".to_string(),
                event_name: "Contest Weekend".to_string(),
                template_image_ref: "templates/e1.png".to_string(),
                text_offsets: None,
            },
        )])
    }

    #[tokio::test]
    async fn test_explicit_address_wins_over_everything() {
        let (g, _, _) = grouper(
            HashMap::from([("st-1".to_string(), "station@example.org".to_string())]),
            HashMap::from([(
                "IU4ABC".to_string(),
                DirectoryEntry { email: Some("dir@example.org".into()), ..Default::default() },
            )]),
        );

        let (groups, unresolved) = g
            .group(vec![record("r1", "IU4ABC", Some("Explicit@Example.ORG"))], &events())
            .await
            .unwrap();

        assert_eq!(unresolved, 0);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].address, "explicit@example.org");
    }

    #[tokio::test]
    async fn test_station_email_beats_directory() {
        let (g, _, _) = grouper(
            HashMap::from([("st-1".to_string(), "station@example.org".to_string())]),
            HashMap::from([(
                "IU4ABC".to_string(),
                DirectoryEntry { email: Some("dir@example.org".into()), ..Default::default() },
            )]),
        );

        let (groups, _) = g.group(vec![record("r1", "IU4ABC", None)], &events()).await.unwrap();
        assert_eq!(groups[0].address, "station@example.org");
    }

    #[tokio::test]
    async fn test_directory_resolves_cleaned_callsign() {
        let (g, _, _) = grouper(
            HashMap::new(),
            HashMap::from([(
                "IU4ABC".to_string(),
                DirectoryEntry { email: Some("dir@example.org".into()), ..Default::default() },
            )]),
        );

        let (groups, unresolved) = g
            .group(vec![record("r1", "EA8/IU4ABC/P", None)], &events())
            .await
            .unwrap();

        assert_eq!(unresolved, 0);
        assert_eq!(groups[0].address, "dir@example.org");
    }

    #[tokio::test]
    async fn test_same_address_lands_in_exactly_one_group() {
        let (g, _, _) = grouper(
            HashMap::new(),
            HashMap::from([
                (
                    "IU4ABC".to_string(),
                    DirectoryEntry { email: Some("shared@example.org".into()), ..Default::default() },
                ),
                (
                    "IW2NKE".to_string(),
                    DirectoryEntry { email: Some("other@example.org".into()), ..Default::default() },
                ),
            ]),
        );

        let (groups, _) = g
            .group(
                vec![
                    record("r1", "IU4ABC", None),
                    record("r2", "IW2NKE", None),
                    record("r3", "IU4ABC/P", None),
                ],
                &events(),
            )
            .await
            .unwrap();

        // Discovery order preserved, both IU4ABC contacts in one group
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].address, "shared@example.org");
        assert_eq!(groups[0].records.len(), 2);
        assert_eq!(groups[1].address, "other@example.org");
        assert_eq!(groups[1].records.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_records_alert_exactly_once() {
        let (g, store, alerts) = grouper(HashMap::new(), HashMap::new());

        // Attempted twice, same (callsign, event) pair
        let (groups, unresolved) = g
            .group(
                vec![record("r1", "IU4ZZZ", None), record("r2", "IU4ZZZ", None)],
                &events(),
            )
            .await
            .unwrap();

        assert!(groups.is_empty());
        assert_eq!(unresolved, 2);
        assert_eq!(store.failed.lock().unwrap().len(), 1);
        assert_eq!(alerts.messages.lock().unwrap().len(), 1);
        assert!(alerts.messages.lock().unwrap()[0].contains("IU4ZZZ"));
    }
}
