///! Card compositor
///!
///! Plans the per-record text overlay, drives one renderer invocation per
///! card, validates the output and uploads it. One record failing here
///! never touches the rest of its group.

use std::sync::Arc;

use anyhow::{Context, Result};

use eqsl_common::interfaces::BlobStore;
use eqsl_common::types::{ConfirmationRecord, EventTemplate};

use super::renderer::{Renderer, TextField};
use super::template_cache::CachedTemplate;

/// Styling applied to every card of a run.
#[derive(Debug, Clone)]
pub struct ComposeStyle {
    pub font: String,
    pub callsign_size_pt: u32,
    pub detail_size_pt: u32,
    pub fill: String,
    pub stroke: String,
    /// Height divisors producing the default offsets of the detail and
    /// grid lines. Empirical values for the stock template shape; events
    /// carry explicit offsets when they deviate.
    pub offset_divisors: [f32; 2],
}

impl Default for ComposeStyle {
    fn default() -> Self {
        Self {
            font: "DejaVu-Sans".to_string(),
            callsign_size_pt: 48,
            detail_size_pt: 24,
            fill: "#ffffff".to_string(),
            stroke: "#1a1a1a".to_string(),
            offset_divisors: [2.15, 2.5],
        }
    }
}

pub struct ImageCompositor {
    renderer: Arc<dyn Renderer>,
    blobs: Arc<dyn BlobStore>,
    style: ComposeStyle,
}

impl ImageCompositor {
    pub fn new(renderer: Arc<dyn Renderer>, blobs: Arc<dyn BlobStore>, style: ComposeStyle) -> Self {
        Self { renderer, blobs, style }
    }

    /// Produce the confirmation image for one record and return its blob
    /// ref. Idempotent: a record already carrying an image ref is
    /// returned as-is, without recompositing.
    pub async fn compose_card(
        &self,
        record: &ConfirmationRecord,
        event: &EventTemplate,
        template: &CachedTemplate,
        grid_line: Option<&str>,
    ) -> Result<String> {
        if let Some(existing) = &record.generated_image_ref {
            tracing::debug!(
                "Record {} already has image {}, skipping composite",
                record.id,
                existing
            );
            return Ok(existing.clone());
        }

        let fields = self.build_fields(record, event, template.height, grid_line);
        let rendered = self
            .renderer
            .compose(&template.bytes, &fields)
            .await
            .with_context(|| format!("Renderer failed for record {}", record.id))?;

        // The renderer is a black box; whatever came back must decode
        // before anything is uploaded.
        let pixmap = tiny_skia::Pixmap::decode_png(&rendered)
            .with_context(|| format!("Renderer output for record {} is not a valid PNG", record.id))?;
        tracing::debug!(
            "Composited {}x{} card for {}",
            pixmap.width(),
            pixmap.height(),
            record.contacted_callsign
        );

        let image_ref = self
            .blobs
            .put(&rendered, "eqsl")
            .await
            .context("Failed to store composited card")?;
        Ok(image_ref)
    }

    /// Assemble the 1-3 text fields of a card. The callsign sits at the
    /// template center unless the event says otherwise; the detail and
    /// grid lines default to height-derived offsets below it.
    fn build_fields(
        &self,
        record: &ConfirmationRecord,
        event: &EventTemplate,
        template_height: u32,
        grid_line: Option<&str>,
    ) -> Vec<TextField> {
        let offsets = event.text_offsets.unwrap_or_default();
        let [detail_div, grid_div] = self.style.offset_divisors;
        let detail_default = (template_height as f32 / detail_div).round() as i32;
        let grid_default = (template_height as f32 / grid_div).round() as i32;

        let mut fields = vec![
            TextField {
                text: record.contacted_callsign.clone(),
                font: self.style.font.clone(),
                offset_from_center: offsets.callsign.unwrap_or(0),
                font_size_pt: self.style.callsign_size_pt,
                fill: self.style.fill.clone(),
                stroke: self.style.stroke.clone(),
            },
            TextField {
                text: format!(
                    "{} | {} | {}",
                    record.contact_timestamp.format("%Y-%m-%d %H:%M UTC"),
                    record.band,
                    record.mode
                ),
                font: self.style.font.clone(),
                offset_from_center: offsets.detail.unwrap_or(detail_default),
                font_size_pt: self.style.detail_size_pt,
                fill: self.style.fill.clone(),
                stroke: self.style.stroke.clone(),
            },
        ];

        if let Some(grid) = grid_line {
            fields.push(TextField {
                text: grid.to_string(),
                font: self.style.font.clone(),
                offset_from_center: offsets.grid.unwrap_or(grid_default),
                font_size_pt: self.style.detail_size_pt,
                fill: self.style.fill.clone(),
                stroke: self.style.stroke.clone(),
            });
        }

        fields
    }
}
