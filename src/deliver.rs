use anyhow::Context as _;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport as _};

use crate::config::{DeliveryCredentials, DigestConfig};
use crate::epub::{BookArtifact, EPUB_MEDIA_TYPE};

const MESSAGE_BODY: &str = "Your daily Hacker News digest is attached.";

#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, artifact: &BookArtifact, recipients: &[String]) -> anyhow::Result<()>;
}

/// Authenticated STARTTLS submission, one message to all recipients.
#[derive(Clone)]
pub struct SmtpDelivery {
    host: String,
    port: u16,
    sender: String,
    password: String,
}

impl std::fmt::Debug for SmtpDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpDelivery")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl SmtpDelivery {
    pub fn new(config: &DigestConfig, credentials: &DeliveryCredentials) -> Self {
        Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            sender: credentials.sender.clone(),
            password: credentials.password.clone(),
        }
    }
}

#[async_trait]
impl Deliver for SmtpDelivery {
    async fn deliver(&self, artifact: &BookArtifact, recipients: &[String]) -> anyhow::Result<()> {
        let message = build_message(&self.sender, recipients, artifact)?;
        let transport = SmtpTransport::starttls_relay(&self.host)
            .with_context(|| format!("smtp relay {}", self.host))?
            .port(self.port)
            .credentials(Credentials::new(self.sender.clone(), self.password.clone()))
            .build();

        tracing::info!(
            host = %self.host,
            recipients = recipients.len(),
            file = %artifact.filename,
            "sending book"
        );
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .context("join smtp send")?
            .context("smtp send")?;
        Ok(())
    }
}

pub fn build_message(
    sender: &str,
    recipients: &[String],
    artifact: &BookArtifact,
) -> anyhow::Result<Message> {
    if recipients.is_empty() {
        anyhow::bail!("no recipients to deliver to");
    }

    let from: Mailbox = sender
        .parse()
        .with_context(|| format!("parse sender address: {sender}"))?;
    let mut builder = Message::builder().from(from).subject(artifact.title.clone());
    for recipient in recipients {
        let to: Mailbox = recipient
            .parse()
            .with_context(|| format!("parse recipient address: {recipient}"))?;
        builder = builder.to(to);
    }

    let content_type = ContentType::parse(EPUB_MEDIA_TYPE).context("epub content type")?;
    let attachment = Attachment::new(artifact.filename.clone()).body(artifact.bytes.clone(), content_type);
    builder
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(MESSAGE_BODY.to_string()))
                .singlepart(attachment),
        )
        .context("build delivery message")
}
