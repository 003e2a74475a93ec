///! Batch orchestrator
///!
///! The scheduled entry point. One invocation drains one day's worth of
///! pending confirmations: fetch, group, composite, send, sweep. Nothing
///! escapes `run_once`; every failure class is accounted for in the
///! summary it logs.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use futures::StreamExt;

use eqsl_common::interfaces::{AdminAlert, BlobStore, DirectoryLookup, MailProvider, RecordStore};
use eqsl_common::types::{ConfirmationRecord, EventTemplate};

use crate::module::compose::{ComposeStyle, ImageCompositor, Renderer, TemplateCache};
use crate::module::janitor::TempJanitor;
use crate::module::locator;

use super::grouper::{DeliveryGroup, RecipientGrouper, clean_callsign};
use super::sender::{GroupOutcome, QuotaAwareSender};

/// Knobs of one batch run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Only records this many days back are considered
    pub lookback_days: i64,
    /// Hard cap on records pulled per run, independent of backlog size
    pub daily_record_cap: usize,
    /// Cards attached per digest; the rest appear in the summary only
    pub attachment_cap: usize,
    /// Concurrent composite jobs within one group
    pub compose_workers: usize,
    /// Scratch space for staged templates and renderer files
    pub work_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            daily_record_cap: 500,
            attachment_cap: 3,
            compose_workers: 4,
            work_dir: PathBuf::from("data/work"),
        }
    }
}

/// What one run did, for the closing summary line.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub considered: usize,
    pub unresolved: usize,
    pub groups_total: usize,
    pub groups_sent: usize,
    pub groups_failed: usize,
    pub records_sent: usize,
    pub compose_failures: usize,
    pub aborted_on_quota: bool,
    pub temp_files_swept: usize,
}

pub struct BatchOrchestrator {
    store: Arc<dyn RecordStore>,
    directory: Arc<dyn DirectoryLookup>,
    compositor: ImageCompositor,
    templates: TemplateCache,
    sender: QuotaAwareSender,
    grouper: RecipientGrouper,
    janitor: Arc<TempJanitor>,
    config: RunConfig,
}

impl BatchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RecordStore>,
        directory: Arc<dyn DirectoryLookup>,
        blobs: Arc<dyn BlobStore>,
        mail: Arc<dyn MailProvider>,
        alerts: Arc<dyn AdminAlert>,
        renderer: Arc<dyn Renderer>,
        style: ComposeStyle,
        janitor: Arc<TempJanitor>,
        config: RunConfig,
    ) -> Self {
        let templates = TemplateCache::new(
            blobs.clone(),
            config.work_dir.join("templates"),
            janitor.clone(),
        );
        let compositor = ImageCompositor::new(renderer, blobs.clone(), style);
        let grouper = RecipientGrouper::new(store.clone(), directory.clone(), alerts);
        let sender = QuotaAwareSender::new(mail, store.clone(), blobs, config.attachment_cap);

        Self {
            store,
            directory,
            compositor,
            templates,
            sender,
            grouper,
            janitor,
            config,
        }
    }

    /// Run one full delivery cycle. Never errors out: the summary always
    /// gets logged, scratch space always gets swept.
    pub async fn run_once(&mut self) -> RunSummary {
        let started = std::time::Instant::now();
        let mut summary = RunSummary::default();

        if let Err(e) = self.run_inner(&mut summary).await {
            tracing::error!("Run stopped by unexpected error: {:#}", e);
        }

        self.templates.cleanup().await;
        summary.temp_files_swept = self.janitor.sweep();

        tracing::info!(
            "Run complete in {:.1}s: {} records considered, {}/{} groups sent, \
             {} records sent, {} unresolved, {} compose failures, {} temp files swept{}",
            started.elapsed().as_secs_f64(),
            summary.considered,
            summary.groups_sent,
            summary.groups_total,
            summary.records_sent,
            summary.unresolved,
            summary.compose_failures,
            summary.temp_files_swept,
            if summary.aborted_on_quota {
                ", aborted on provider quota"
            } else {
                ""
            },
        );

        summary
    }

    async fn run_inner(&mut self, summary: &mut RunSummary) -> Result<()> {
        let cutoff = Utc::now() - Duration::days(self.config.lookback_days);
        let pending = self
            .store
            .find_pending(cutoff, self.config.daily_record_cap)
            .await
            .context("Failed to fetch pending records")?;
        summary.considered = pending.len();

        if pending.is_empty() {
            tracing::info!("No pending confirmations within the window");
            return Ok(());
        }

        let events = self.load_events(&pending).await?;
        let (groups, unresolved) = self.grouper.group(pending, &events).await?;
        summary.unresolved = unresolved;
        summary.groups_total = groups.len();

        for group in groups {
            // Quota state is global; check synchronously before each group.
            if self.sender.quota_exceeded() {
                summary.aborted_on_quota = true;
                tracing::warn!(
                    "Provider quota exhausted, leaving remaining groups for the next run"
                );
                break;
            }

            let group = self.composite_group(group, &events, summary).await;

            match self.sender.send_group(&group).await {
                GroupOutcome::Sent { records } => {
                    summary.groups_sent += 1;
                    summary.records_sent += records;
                }
                GroupOutcome::Skipped => {}
                GroupOutcome::Failed => summary.groups_failed += 1,
                GroupOutcome::QuotaExceeded => summary.aborted_on_quota = true,
            }
        }

        Ok(())
    }

    /// Load the template metadata of every event the pending records
    /// reference. Records of unknown events surface later as compose
    /// failures.
    async fn load_events(
        &self,
        records: &[ConfirmationRecord],
    ) -> Result<HashMap<String, EventTemplate>> {
        let mut events = HashMap::new();
        let mut seen = HashSet::new();

        for record in records {
            if !seen.insert(record.event_id.clone()) {
                continue;
            }
            match self
                .store
                .event(&record.event_id)
                .await
                .with_context(|| format!("Failed to load event {}", record.event_id))?
            {
                Some(event) => {
                    events.insert(record.event_id.clone(), event);
                }
                None => tracing::warn!(
                    "Record {} references unknown event {}",
                    record.id,
                    record.event_id
                ),
            }
        }

        Ok(events)
    }

    /// Composite every card of one group on a bounded worker pool. One
    /// record's failure drops that record (it stays pending) and never
    /// blocks the rest.
    async fn composite_group(
        &self,
        group: DeliveryGroup,
        events: &HashMap<String, EventTemplate>,
        summary: &mut RunSummary,
    ) -> DeliveryGroup {
        let address = group.address;
        let workers = self.config.compose_workers.max(1);

        let jobs = group
            .records
            .into_iter()
            .map(|record| self.composite_record(record, events));
        let results: Vec<Option<ConfirmationRecord>> =
            futures::stream::iter(jobs).buffered(workers).collect().await;

        summary.compose_failures += results.iter().filter(|r| r.is_none()).count();

        DeliveryGroup {
            address,
            records: results.into_iter().flatten().collect(),
        }
    }

    async fn composite_record(
        &self,
        mut record: ConfirmationRecord,
        events: &HashMap<String, EventTemplate>,
    ) -> Option<ConfirmationRecord> {
        let Some(event) = events.get(&record.event_id) else {
            tracing::warn!(
                "Skipping record {}: no template for event {}",
                record.id,
                record.event_id
            );
            return None;
        };

        // Composited on an earlier run; nothing to redo.
        if record.generated_image_ref.is_some() {
            return Some(record);
        }

        let template = match self.templates.get_or_fetch(event).await {
            Ok(template) => template,
            Err(e) => {
                tracing::warn!("Template fetch failed for event {}: {:#}", event.event_id, e);
                return None;
            }
        };

        let grid_line = self.resolve_grid_line(&record).await;

        match self
            .compositor
            .compose_card(&record, event, &template, grid_line.as_deref())
            .await
        {
            Ok(image_ref) => {
                record.generated_image_ref = Some(image_ref);
                if let Err(e) = self.store.save(&record).await {
                    tracing::error!("Failed to persist image ref for {}: {}", record.id, e);
                }
                Some(record)
            }
            Err(e) => {
                tracing::warn!(
                    "Compositing failed for record {}, it stays pending: {:#}",
                    record.id,
                    e
                );
                None
            }
        }
    }

    /// Grid line of the card: the record's own locator, the directory's,
    /// or one computed from the directory's coordinates.
    async fn resolve_grid_line(&self, record: &ConfirmationRecord) -> Option<String> {
        if let Some(grid) = &record.grid_locator {
            return Some(format!("GRID {}", grid.to_ascii_uppercase()));
        }

        let base_call = clean_callsign(&record.contacted_callsign);
        match self.directory.lookup(&base_call).await {
            Ok(Some(entry)) => {
                if let Some(grid) = entry.locator {
                    return Some(format!("GRID {}", grid.to_ascii_uppercase()));
                }
                if let (Some(lat), Some(lon)) = (entry.lat, entry.lon) {
                    return locator::to_locator(lat, lon).map(|grid| format!("GRID {grid}"));
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("Grid lookup failed for {}: {}", base_call, e);
                None
            }
        }
    }
}
