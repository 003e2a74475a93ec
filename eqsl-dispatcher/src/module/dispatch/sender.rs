///! Quota-aware digest sender
///!
///! One digest per destination group. Every provider outcome is
///! classified; quota exhaustion flips a run-wide flag that the
///! orchestrator checks before starting anything else. Records become
///! `sent` here and nowhere else, strictly after acknowledgment.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use eqsl_common::interfaces::{BlobStore, MailProvider, RecordStore};
use eqsl_common::types::{Attachment, ConfirmationRecord};

use super::grouper::DeliveryGroup;

/// Terminal state of one group's send attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Digest acknowledged and `records` marked sent
    Sent { records: usize },
    /// Nothing in the group had a composited card; left pending
    Skipped,
    /// Provider failed below the quota threshold; group left pending
    Failed,
    /// Provider reported quota exhaustion; the run must stop
    QuotaExceeded,
}

pub struct QuotaAwareSender {
    mail: Arc<dyn MailProvider>,
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    attachment_cap: usize,
    quota_exceeded: bool,
}

impl QuotaAwareSender {
    pub fn new(
        mail: Arc<dyn MailProvider>,
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        attachment_cap: usize,
    ) -> Self {
        Self {
            mail,
            store,
            blobs,
            attachment_cap,
            quota_exceeded: false,
        }
    }

    /// Set once a provider reports quota exhaustion. Checked before every
    /// group, never reset within a run.
    pub fn quota_exceeded(&self) -> bool {
        self.quota_exceeded
    }

    pub async fn send_group(&mut self, group: &DeliveryGroup) -> GroupOutcome {
        let ready: Vec<&ConfirmationRecord> = group
            .records
            .iter()
            .filter(|record| record.generated_image_ref.is_some())
            .collect();

        if ready.is_empty() {
            tracing::debug!("No composited cards for {}, leaving group pending", group.address);
            return GroupOutcome::Skipped;
        }

        let attachments = match self.load_attachments(&ready).await {
            Ok(attachments) => attachments,
            Err(e) => {
                tracing::error!("Failed to stage attachments for {}: {:#}", group.address, e);
                return GroupOutcome::Failed;
            }
        };

        let subject = digest_subject(&ready);
        let body = digest_body(&ready, self.attachment_cap);

        match self.mail.send_digest(&group.address, &subject, &body, &attachments).await {
            Ok(ack) if ack.accepted => {
                tracing::info!(
                    "Digest to {} accepted ({} cards, {} attached)",
                    group.address,
                    ready.len(),
                    attachments.len()
                );
                self.mark_sent(&ready).await
            }
            Ok(_) => {
                tracing::warn!("Provider did not accept digest for {}", group.address);
                GroupOutcome::Failed
            }
            Err(err) if err.is_quota() => {
                tracing::error!(
                    "Provider quota exhausted while sending to {}: {}",
                    group.address,
                    err
                );
                self.quota_exceeded = true;
                GroupOutcome::QuotaExceeded
            }
            Err(err) => {
                tracing::warn!("Digest to {} failed, group stays pending: {}", group.address, err);
                GroupOutcome::Failed
            }
        }
    }

    /// Pull the card images for the first `attachment_cap` records.
    async fn load_attachments(&self, ready: &[&ConfirmationRecord]) -> Result<Vec<Attachment>> {
        let mut attachments = Vec::new();
        for record in ready.iter().take(self.attachment_cap) {
            let Some(image_ref) = record.generated_image_ref.as_deref() else {
                continue;
            };
            let bytes = self.blobs.get(image_ref).await?;
            attachments.push(Attachment {
                filename: attachment_filename(record),
                content_type: "image/png".to_string(),
                bytes,
            });
        }
        Ok(attachments)
    }

    /// The only place records become `sent`.
    async fn mark_sent(&self, ready: &[&ConfirmationRecord]) -> GroupOutcome {
        let now = Utc::now();
        let mut marked = 0;
        for record in ready {
            let mut updated = (*record).clone();
            updated.sent = true;
            updated.sent_at = Some(now);
            match self.store.save(&updated).await {
                Ok(()) => marked += 1,
                Err(e) => tracing::error!("Failed to persist sent flag for {}: {}", record.id, e),
            }
        }
        GroupOutcome::Sent { records: marked }
    }
}

fn attachment_filename(record: &ConfirmationRecord) -> String {
    let call: String = record
        .contacted_callsign
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    format!("eqsl_{}_{}.png", call, record.contact_timestamp.format("%Y%m%d_%H%M"))
}

fn digest_subject(ready: &[&ConfirmationRecord]) -> String {
    if ready.len() == 1 {
        format!("Your eQSL confirmation from {}", ready[0].origin_station_id)
    } else {
        format!("{} new eQSL confirmations", ready.len())
    }
}

/// HTML summary listing every confirmed contact; a note flags when not
/// all cards fit the attachment cap.
fn digest_body(ready: &[&ConfirmationRecord], cap: usize) -> String {
    let mut rows = String::new();
    for record in ready {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&record.contacted_callsign),
            record.contact_timestamp.format("%Y-%m-%d %H:%M UTC"),
            escape_html(&record.band),
            escape_html(&record.mode),
        ));
    }

    let note = if ready.len() > cap {
        format!(
            "<p>{} contacts confirmed; the first {} cards are attached.</p>",
            ready.len(),
            cap
        )
    } else {
        String::new()
    };

    format!(
        "<html><body>\n<h2>eQSL confirmations</h2>\n<table>\n\
         <thead><tr><th>Callsign</th><th>Time</th><th>Band</th><th>Mode</th></tr></thead>\n\
         <tbody>\n{rows}</tbody>\n</table>\n{note}</body></html>"
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use eqsl_common::interfaces::ProviderError;
    use eqsl_common::types::{EventTemplate, FailedAddressEntry, ProviderAck};
    use std::sync::Mutex;

    struct ScriptedMail {
        // One scripted outcome per send, consumed in order
        outcomes: Mutex<Vec<Result<ProviderAck, ProviderError>>>,
        sent: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl MailProvider for ScriptedMail {
        async fn send_digest(
            &self,
            address: &str,
            _subject: &str,
            _html_body: &str,
            attachments: &[Attachment],
        ) -> Result<ProviderAck, ProviderError> {
            self.sent.lock().unwrap().push((address.to_string(), attachments.len()));
            self.outcomes.lock().unwrap().remove(0)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<ConfirmationRecord>>,
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn find_pending(
            &self,
            _since: chrono::DateTime<Utc>,
            _limit: usize,
        ) -> Result<Vec<ConfirmationRecord>> {
            Ok(Vec::new())
        }

        async fn save(&self, record: &ConfirmationRecord) -> Result<()> {
            self.saved.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn event(&self, _event_id: &str) -> Result<Option<EventTemplate>> {
            Ok(None)
        }

        async fn station_email(&self, _station_id: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn record_failed_address(&self, _entry: &FailedAddressEntry) -> Result<bool> {
            Ok(true)
        }
    }

    struct StaticBlobs;

    #[async_trait]
    impl BlobStore for StaticBlobs {
        async fn put(&self, _bytes: &[u8], _folder: &str) -> Result<String> {
            unimplemented!("sender never writes blobs")
        }

        async fn get(&self, _url_ref: &str) -> Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    fn record(id: &str, image_ref: Option<&str>) -> ConfirmationRecord {
        ConfirmationRecord {
            id: id.to_string(),
            event_id: "E1".to_string(),
            destination_address: None,
            origin_station_id: "II4EVT".to_string(),
            contacted_callsign: "IU4ABC".to_string(),
            contact_timestamp: Utc.with_ymd_and_hms(2026, 6, 12, 14, 30, 0).unwrap(),
            band: "20m".to_string(),
            mode: "SSB".to_string(),
            grid_locator: None,
            generated_image_ref: image_ref.map(str::to_string),
            sent: false,
            sent_at: None,
        }
    }

    fn group(records: Vec<ConfirmationRecord>) -> DeliveryGroup {
        DeliveryGroup { address: "op@example.org".to_string(), records }
    }

    fn sender(
        outcomes: Vec<Result<ProviderAck, ProviderError>>,
    ) -> (QuotaAwareSender, Arc<ScriptedMail>, Arc<MemoryStore>) {
        let mail = Arc::new(ScriptedMail {
            outcomes: Mutex::new(outcomes),
            sent: Mutex::new(Vec::new()),
        });
        let store = Arc::new(MemoryStore::default());
        let s = QuotaAwareSender::new(mail.clone(), store.clone(), Arc::new(StaticBlobs), 3);
        (s, mail, store)
    }

    fn accepted() -> Result<ProviderAck, ProviderError> {
        Ok(ProviderAck { accepted: true, detail: None })
    }

    #[tokio::test]
    async fn test_acknowledged_group_is_marked_sent() {
        let (mut sender, _, store) = sender(vec![accepted()]);

        let outcome = sender
            .send_group(&group(vec![record("r1", Some("eqsl/a.png")), record("r2", Some("eqsl/b.png"))]))
            .await;

        assert_eq!(outcome, GroupOutcome::Sent { records: 2 });
        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|r| r.sent && r.sent_at.is_some()));
        assert!(!sender.quota_exceeded());
    }

    #[tokio::test]
    async fn test_failed_group_marks_nothing() {
        let (mut sender, _, store) = sender(vec![Err(ProviderError::Transient {
            detail: "connection reset".into(),
        })]);

        let outcome = sender.send_group(&group(vec![record("r1", Some("eqsl/a.png"))])).await;

        assert_eq!(outcome, GroupOutcome::Failed);
        assert!(store.saved.lock().unwrap().is_empty());
        assert!(!sender.quota_exceeded());
    }

    #[tokio::test]
    async fn test_quota_outcome_sets_the_run_flag() {
        let (mut sender, _, store) = sender(vec![Err(ProviderError::QuotaExceeded {
            detail: "452 4.2.2 daily quota exceeded".into(),
        })]);

        let outcome = sender.send_group(&group(vec![record("r1", Some("eqsl/a.png"))])).await;

        assert_eq!(outcome, GroupOutcome::QuotaExceeded);
        assert!(sender.quota_exceeded());
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attachments_are_capped_but_all_records_marked() {
        let (mut sender, mail, store) = sender(vec![accepted()]);

        let records: Vec<ConfirmationRecord> = (0..5)
            .map(|i| record(&format!("r{i}"), Some("eqsl/card.png")))
            .collect();

        let outcome = sender.send_group(&group(records)).await;

        assert_eq!(outcome, GroupOutcome::Sent { records: 5 });
        assert_eq!(mail.sent.lock().unwrap()[0].1, 3); // cap
        assert_eq!(store.saved.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_group_without_cards_is_skipped() {
        let (mut sender, mail, _) = sender(vec![]);

        let outcome = sender.send_group(&group(vec![record("r1", None)])).await;

        assert_eq!(outcome, GroupOutcome::Skipped);
        assert!(mail.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_digest_body_notes_the_cap() {
        let records: Vec<ConfirmationRecord> = (0..5)
            .map(|i| record(&format!("r{i}"), Some("eqsl/card.png")))
            .collect();
        let refs: Vec<&ConfirmationRecord> = records.iter().collect();

        let body = digest_body(&refs, 3);
        assert!(body.contains("5 contacts confirmed; the first 3 cards are attached."));
        assert_eq!(body.matches("<tr><td>").count(), 5);

        let short: Vec<&ConfirmationRecord> = records.iter().take(2).collect();
        assert!(!digest_body(&short, 3).contains("cards are attached"));
    }

    #[test]
    fn test_attachment_filename_is_filesystem_safe() {
        let mut rec = record("r1", None);
        rec.contacted_callsign = "EA8/IU4ABC/P".to_string();
        assert_eq!(attachment_filename(&rec), "eqsl_ea8iu4abcp_20260612_1430.png");
    }
}
