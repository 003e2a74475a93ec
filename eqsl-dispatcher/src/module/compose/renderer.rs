///! External card renderer boundary
///!
///! The dispatcher does no typography itself: a template plus up to three
///! text fields goes to an external renderer and a finished PNG comes
///! back. The subprocess implementation shells out to an
///! ImageMagick-style tool under a hard timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::module::janitor::TempJanitor;

/// One line of text stamped onto the card.
#[derive(Debug, Clone)]
pub struct TextField {
    pub text: String,
    pub font: String,
    /// Pixels from the template center, positive is down
    pub offset_from_center: i32,
    pub font_size_pt: u32,
    pub fill: String,
    pub stroke: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("renderer timed out after {0} seconds")]
    TimedOut(u64),

    #[error("renderer produced no readable output: {0}")]
    BadOutput(String),

    #[error("renderer i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Black-box compositing backend.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Compose `fields` over the template bytes and return the finished
    /// image.
    async fn compose(&self, template: &[u8], fields: &[TextField]) -> Result<Vec<u8>, RenderError>;
}

/// Renderer backed by an external command line tool.
///
/// Invocation shape: `<command> <input.png> [per-field -font/-pointsize/
/// -fill/-stroke/-gravity/-annotate args] <output.png>`. Staged files are
/// registered with the janitor, so a failed invocation leaves nothing
/// behind once the run sweeps.
pub struct SubprocessRenderer {
    command: String,
    work_dir: PathBuf,
    timeout: Duration,
    janitor: Arc<TempJanitor>,
}

impl SubprocessRenderer {
    pub fn new(
        command: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
        janitor: Arc<TempJanitor>,
    ) -> Self {
        Self {
            command: command.into(),
            work_dir: work_dir.into(),
            timeout,
            janitor,
        }
    }

    fn annotate_args(field: &TextField) -> Vec<String> {
        vec![
            "-font".into(),
            field.font.clone(),
            "-pointsize".into(),
            field.font_size_pt.to_string(),
            "-fill".into(),
            field.fill.clone(),
            "-stroke".into(),
            field.stroke.clone(),
            "-gravity".into(),
            "center".into(),
            "-annotate".into(),
            format!("{:+}{:+}", 0, field.offset_from_center),
            field.text.clone(),
        ]
    }
}

#[async_trait]
impl Renderer for SubprocessRenderer {
    async fn compose(&self, template: &[u8], fields: &[TextField]) -> Result<Vec<u8>, RenderError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let stem = uuid::Uuid::now_v7().simple().to_string();
        let input = self.work_dir.join(format!("{stem}_in.png"));
        let output = self.work_dir.join(format!("{stem}_out.png"));
        self.janitor.register(&input);
        self.janitor.register(&output);

        tokio::fs::write(&input, template).await?;

        let mut cmd = Command::new(&self.command);
        cmd.arg(&input);
        for field in fields {
            cmd.args(Self::annotate_args(field));
        }
        cmd.arg(&output);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let invocation = async {
            let out = cmd.output().await?;
            if !out.status.success() {
                return Err(RenderError::Failed {
                    status: out.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
                });
            }
            Ok(())
        };

        match tokio::time::timeout(self.timeout, invocation).await {
            Ok(result) => result?,
            Err(_) => return Err(RenderError::TimedOut(self.timeout.as_secs())),
        }

        let bytes = tokio::fs::read(&output)
            .await
            .map_err(|e| RenderError::BadOutput(e.to_string()))?;

        self.janitor.release(&input);
        self.janitor.release(&output);
        Ok(bytes)
    }
}
