//! Mail delivery via SMTP.
//!
//! [`SmtpMailer`] wraps the `lettre` async SMTP transport over implicit TLS.
//! Every mail is multipart: the plain-text body plus the rendered report.

use super::EmailJob;
use crate::config::EmailConfig;

use lettre::message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Why a report or alert did not reach the relay.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// The relay refused the login or the connection dropped.
    #[error("relay rejected delivery: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// Sender or a configured recipient is not a valid mailbox.
    #[error("invalid mailbox: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("could not assemble report mail: {0}")]
    Build(String),
}

/// Anything that can deliver an [`EmailJob`].
#[allow(async_fn_in_trait)]
pub trait MailSender {
    async fn send(&self, job: &EmailJob) -> Result<(), MailError>;
}

/// Assemble the MIME message for `job`.
pub fn build_message(sender: &str, job: &EmailJob) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(sender.parse::<Mailbox>()?)
        .subject(job.subject.as_str());

    for recipient in &job.recipients {
        builder = builder.to(recipient.parse::<Mailbox>()?);
    }

    let content_type = ContentType::parse(job.attachment.content_type)
        .map_err(|e| MailError::Build(e.to_string()))?;
    let attachment = Attachment::new(job.attachment.file_name.clone())
        .body(job.attachment.bytes.clone(), content_type);

    builder
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(job.body.clone()))
                .singlepart(attachment),
        )
        .map_err(|e| MailError::Build(e.to_string()))
}

/// Sends mail through the configured relay.
pub struct SmtpMailer {
    sender: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            sender: config.sender.clone(),
            transport,
        })
    }
}

impl MailSender for SmtpMailer {
    async fn send(&self, job: &EmailJob) -> Result<(), MailError> {
        let message = build_message(&self.sender, job)?;
        self.transport.send(message).await?;

        tracing::info!(
            "Mail \"{}\" sent to {:?} group ({} recipient(s))",
            job.subject,
            job.group,
            job.recipients.len()
        );
        Ok(())
    }
}
