///! SMTP mail provider
///!
///! lettre-backed digest delivery. Provider responses are classified into
///! the error taxonomy the sender acts on; the quota heuristics live in a
///! pure function so they stay testable without a transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use eqsl_common::interfaces::{AdminAlert, MailProvider, ProviderError};
use eqsl_common::types::{Attachment, ProviderAck};

use crate::config::SmtpConfig;

/// Response wording that means "stop sending, you are over quota" rather
/// than "this one message failed".
const QUOTA_MARKERS: &[&str] = &[
    "quota",
    "limit exceeded",
    "sending limit",
    "rate limit",
    "too many messages",
];

/// Classify a provider response into the error taxonomy.
///
/// 452 and 421 are the insufficient-storage / too-much-mail status
/// classes; anything else falls back to wording heuristics on the
/// response text, then to the transport's transient/permanent split.
pub fn classify_provider_response(code: Option<u16>, transient: bool, detail: &str) -> ProviderError {
    let lowered = detail.to_ascii_lowercase();
    let quota_code = matches!(code, Some(452) | Some(421));

    if quota_code || QUOTA_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return ProviderError::QuotaExceeded { detail: detail.to_string() };
    }

    if transient {
        ProviderError::Transient { detail: detail.to_string() }
    } else {
        ProviderError::Rejected { detail: detail.to_string() }
    }
}

pub struct SmtpMailProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailProvider {
    pub fn from_config(config: &SmtpConfig) -> anyhow::Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid sender address: {}", config.from))?;

        let mut builder = match config.tls.as_str() {
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?,
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?,
        };

        builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(
        &self,
        address: &str,
        subject: &str,
        html_body: &str,
        attachments: &[Attachment],
    ) -> Result<Message, ProviderError> {
        let to: Mailbox = address.parse().map_err(|_| ProviderError::Rejected {
            detail: format!("malformed address {address}"),
        })?;

        let mut multipart = MultiPart::mixed().singlepart(SinglePart::html(html_body.to_string()));
        for attachment in attachments {
            let content_type =
                ContentType::parse(&attachment.content_type).map_err(|e| ProviderError::Rejected {
                    detail: format!("bad content type {}: {}", attachment.content_type, e),
                })?;
            multipart = multipart.singlepart(
                MailAttachment::new(attachment.filename.clone())
                    .body(attachment.bytes.clone(), content_type),
            );
        }

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(multipart)
            .map_err(|e| ProviderError::Rejected {
                detail: format!("failed to build message: {e}"),
            })
    }
}

#[async_trait]
impl MailProvider for SmtpMailProvider {
    async fn send_digest(
        &self,
        address: &str,
        subject: &str,
        html_body: &str,
        attachments: &[Attachment],
    ) -> Result<ProviderAck, ProviderError> {
        let message = self.build_message(address, subject, html_body, attachments)?;

        match self.transport.send(message).await {
            Ok(response) => Ok(ProviderAck {
                accepted: response.is_positive(),
                detail: Some(response.code().to_string()),
            }),
            Err(err) => {
                let code = err
                    .status()
                    .and_then(|status| status.to_string().parse::<u16>().ok());
                Err(classify_provider_response(code, err.is_transient(), &err.to_string()))
            }
        }
    }
}

/// Admin alerting over the same SMTP transport; best effort by contract.
pub struct SmtpAdminAlert {
    provider: Arc<SmtpMailProvider>,
    admin_address: String,
}

impl SmtpAdminAlert {
    pub fn new(provider: Arc<SmtpMailProvider>, admin_address: String) -> Self {
        Self { provider, admin_address }
    }
}

#[async_trait]
impl AdminAlert for SmtpAdminAlert {
    async fn notify(&self, message: &str, channel: &str) {
        let subject = format!("[{channel}] dispatcher alert");
        let body = format!("<pre>{message}</pre>");
        if let Err(e) = self
            .provider
            .send_digest(&self.admin_address, &subject, &body, &[])
            .await
        {
            tracing::warn!("Admin alert delivery failed: {}", e);
        }
    }
}

/// Fallback when no admin address is configured.
pub struct LogAdminAlert;

#[async_trait]
impl AdminAlert for LogAdminAlert {
    async fn notify(&self, message: &str, channel: &str) {
        tracing::warn!("[{}] {}", channel, message);
    }
}
