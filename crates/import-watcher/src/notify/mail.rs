use lettre::message::header::{ContentType, ContentTypeErr};
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use super::compose::INLINE_IMAGE_CID;
use crate::config::MailConfig;

/// Fully assembled alert ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    /// JPEG bytes referenced from the body as `cid:meme_image`.
    pub inline_image: Option<Vec<u8>>,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("no recipients configured")]
    NoRecipients,
    #[error("invalid address '{address}': {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("invalid content type: {0}")]
    ContentType(#[from] ContentTypeErr),
    #[error("unable to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

pub trait MailTransport: std::fmt::Debug {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Plain or STARTTLS SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
    host: String,
}

impl SmtpMailer {
    /// `None` when no SMTP server is configured.
    pub fn from_config(config: &MailConfig) -> Result<Option<Self>, MailError> {
        let Some(host) = config.server.as_deref() else {
            return Ok(None);
        };

        let builder = if config.starttls {
            SmtpTransport::starttls_relay(host)?
        } else {
            SmtpTransport::builder_dangerous(host)
        };
        let mut builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Some(Self {
            transport: builder.build(),
            host: format!("{host}:{}", config.port),
        }))
    }
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl MailTransport for SmtpMailer {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let message = build_message(mail)?;
        self.transport.send(&message)?;
        Ok(())
    }
}

/// Builds a `multipart/related` message: the HTML part first, then the
/// inline image when present.
pub fn build_message(mail: &OutgoingMail) -> Result<Message, MailError> {
    if mail.to.is_empty() {
        return Err(MailError::NoRecipients);
    }

    let mut builder = Message::builder()
        .from(parse_mailbox(&mail.from)?)
        .subject(mail.subject.as_str());
    for recipient in &mail.to {
        builder = builder.to(parse_mailbox(recipient)?);
    }

    let mut body = MultiPart::related().singlepart(SinglePart::html(mail.html_body.clone()));
    if let Some(image) = &mail.inline_image {
        body = body.singlepart(
            Attachment::new_inline(INLINE_IMAGE_CID.to_string())
                .body(image.clone(), ContentType::parse("image/jpeg")?),
        );
    }

    Ok(builder.multipart(body)?)
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse::<Mailbox>().map_err(|source| MailError::Address {
        address: address.to_string(),
        source,
    })
}
