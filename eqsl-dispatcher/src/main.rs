use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use eqsl_common::interfaces::AdminAlert;
use eqsl_dispatcher::config;
use eqsl_dispatcher::module::compose::{ComposeStyle, SubprocessRenderer};
use eqsl_dispatcher::module::dispatch::{BatchOrchestrator, HttpDirectoryLookup, RunConfig};
use eqsl_dispatcher::module::janitor::TempJanitor;
use eqsl_dispatcher::module::mail::{LogAdminAlert, SmtpAdminAlert, SmtpMailProvider};
use eqsl_dispatcher::module::storage::{FsBlobStore, JsonRecordStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    config::read_config()?;
    let config = config::CONFIG.get().unwrap();

    // Initialize logging
    let _logging_guard =
        eqsl_dispatcher::logging::init_logging("logs", "eqsl-dispatcher", &config.log_level);

    tracing::info!("eQSL dispatcher starting...");

    let data_dir = PathBuf::from(&config.data_dir);
    let work_dir = data_dir.join("work");

    // Wire the collaborators
    let store = Arc::new(JsonRecordStore::open(&data_dir).await?);
    let blobs = Arc::new(FsBlobStore::new(data_dir.join("blobs")));
    let directory = Arc::new(HttpDirectoryLookup::new(
        &config.directory.url,
        Duration::from_secs(config.directory.timeout_secs),
        config.directory.cache_ttl_secs,
    ));
    let mail = Arc::new(SmtpMailProvider::from_config(&config.smtp)?);
    let alerts: Arc<dyn AdminAlert> = match &config.alerts.admin_address {
        Some(address) => Arc::new(SmtpAdminAlert::new(mail.clone(), address.clone())),
        None => Arc::new(LogAdminAlert),
    };

    // Run-scoped scratch space management
    let janitor = Arc::new(TempJanitor::new());
    let renderer = Arc::new(SubprocessRenderer::new(
        &config.compose.renderer_command,
        work_dir.join("render"),
        Duration::from_secs(config.compose.renderer_timeout_secs),
        janitor.clone(),
    ));

    let style = ComposeStyle {
        font: config.compose.font.clone(),
        callsign_size_pt: config.compose.callsign_size_pt,
        detail_size_pt: config.compose.detail_size_pt,
        fill: config.compose.fill.clone(),
        stroke: config.compose.stroke.clone(),
        offset_divisors: config.compose.offset_divisors,
    };
    let run_config = RunConfig {
        lookback_days: config.schedule.lookback_days,
        daily_record_cap: config.schedule.daily_record_cap,
        attachment_cap: config.attachment_cap,
        compose_workers: config.compose.workers,
        work_dir,
    };

    // One scheduled invocation, one run
    let mut orchestrator = BatchOrchestrator::new(
        store, directory, blobs, mail, alerts, renderer, style, janitor, run_config,
    );
    let summary = orchestrator.run_once().await;

    if summary.aborted_on_quota {
        tracing::warn!("Run ended early on provider quota; unsent groups stay pending");
    }

    Ok(())
}
