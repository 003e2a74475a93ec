///! Run-scoped template cache
///!
///! The shared event template is fetched and decoded once per event per
///! run; every later record of the same event reuses the entry. The
///! whole cache is discarded at run end, staged files included.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use eqsl_common::interfaces::BlobStore;
use eqsl_common::types::EventTemplate;

use crate::module::janitor::TempJanitor;

/// A fetched and decoded event template, staged for the renderer.
pub struct CachedTemplate {
    pub event_id: String,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// On-disk staging copy; removed when the run ends
    pub path: PathBuf,
}

pub struct TemplateCache {
    blobs: Arc<dyn BlobStore>,
    work_dir: PathBuf,
    janitor: Arc<TempJanitor>,
    // Lock held across the fetch so the first caller per event pays the
    // cost exactly once.
    entries: Mutex<HashMap<String, Arc<CachedTemplate>>>,
}

impl TemplateCache {
    pub fn new(blobs: Arc<dyn BlobStore>, work_dir: PathBuf, janitor: Arc<TempJanitor>) -> Self {
        Self {
            blobs,
            work_dir,
            janitor,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch, decode and stage the template of `event`, or return the
    /// entry an earlier caller already produced.
    pub async fn get_or_fetch(&self, event: &EventTemplate) -> Result<Arc<CachedTemplate>> {
        let mut entries = self.entries.lock().await;
        if let Some(hit) = entries.get(&event.event_id) {
            return Ok(hit.clone());
        }

        tracing::debug!(
            "Fetching template {} for event {}",
            event.template_image_ref,
            event.event_id
        );
        let bytes = self
            .blobs
            .get(&event.template_image_ref)
            .await
            .with_context(|| format!("Failed to fetch template {}", event.template_image_ref))?;

        let pixmap = tiny_skia::Pixmap::decode_png(&bytes)
            .with_context(|| format!("Template of event {} is not a valid PNG", event.event_id))?;

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .context("Failed to create template staging directory")?;
        let path = self.work_dir.join(format!("template_{}.png", event.event_id));
        tokio::fs::write(&path, &bytes)
            .await
            .context("Failed to stage template file")?;
        self.janitor.register(&path);

        let entry = Arc::new(CachedTemplate {
            event_id: event.event_id.clone(),
            width: pixmap.width(),
            height: pixmap.height(),
            bytes,
            path,
        });
        entries.insert(event.event_id.clone(), entry.clone());
        Ok(entry)
    }

    /// Drop every staged entry. Called once when the run winds down.
    pub async fn cleanup(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            self.janitor.release(&entry.path);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
