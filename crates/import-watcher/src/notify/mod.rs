//! Operator alerts for stall outcomes.
//!
//! Nothing in here may fail a run: rendering and delivery problems are logged
//! and the alert degrades (no graphic) or is dropped.

pub mod compose;
pub mod mail;
pub mod meme;

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::config::WatcherConfig;
use crate::watch::StallOutcome;

pub use compose::{compose, render_html, Alert, AlertContext, AlertKind, INLINE_IMAGE_CID};
pub use mail::{build_message, MailError, MailTransport, OutgoingMail, SmtpMailer};
pub use meme::{MemeRenderer, RenderError};

pub trait Notifier: std::fmt::Debug {
    fn notify(&self, outcome: &StallOutcome);
}

/// Renders the alert graphic and mails it to the configured recipients.
#[derive(Debug)]
pub struct EmailNotifier {
    context: AlertContext,
    sender: String,
    recipients: Vec<String>,
    success_template: Option<PathBuf>,
    failure_template: Option<PathBuf>,
    renderer: MemeRenderer,
    transport: Option<Box<dyn MailTransport>>,
}

impl EmailNotifier {
    pub fn new(config: &WatcherConfig, transport: Option<Box<dyn MailTransport>>) -> Self {
        let old_folder_name = config
            .paths
            .old_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.paths.old_dir.display().to_string());

        Self {
            context: AlertContext {
                node_name: config.node_name.clone(),
                pipeline_label: config.pipeline_label.clone(),
                old_folder_name,
            },
            sender: config.mail.sender(&config.node_name),
            recipients: config.mail.recipients.clone(),
            success_template: config.memes.success_template.clone(),
            failure_template: config.memes.failure_template.clone(),
            renderer: MemeRenderer::new(),
            transport,
        }
    }

    /// Uses SMTP when a server is configured; a bad SMTP setup only disables mail.
    pub fn from_config(config: &WatcherConfig) -> Self {
        let transport = match SmtpMailer::from_config(&config.mail) {
            Ok(Some(mailer)) => Some(Box::new(mailer) as Box<dyn MailTransport>),
            Ok(None) => {
                warn!("SMTP_SERVER is not set; alerts will only be logged");
                None
            }
            Err(err) => {
                error!(error = %err, "unable to configure SMTP; alerts will only be logged");
                None
            }
        };
        Self::new(config, transport)
    }

    fn graphic_for(&self, alert: &Alert) -> Option<Vec<u8>> {
        let template = match alert.kind {
            AlertKind::ServiceDown => self.failure_template.as_deref(),
            AlertKind::Restored => self.success_template.as_deref(),
        };
        let Some(template) = template else {
            info!(kind = ?alert.kind, "no alert template configured; sending text only");
            return None;
        };

        match self
            .renderer
            .render(template, &alert.top_caption, &alert.bottom_caption)
        {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                error!(
                    template = %template.display(),
                    error = %err,
                    "failed to generate alert graphic"
                );
                None
            }
        }
    }
}

impl Notifier for EmailNotifier {
    fn notify(&self, outcome: &StallOutcome) {
        let Some(alert) = compose(outcome, &self.context) else {
            return;
        };

        let Some(transport) = self.transport.as_deref() else {
            warn!(subject = %alert.subject, "mail transport unavailable; alert not sent");
            return;
        };
        if self.recipients.is_empty() {
            warn!(subject = %alert.subject, "no SMTP_RECIPIENTS configured; alert not sent");
            return;
        }

        let image = self.graphic_for(&alert);
        let mail = OutgoingMail {
            from: self.sender.clone(),
            to: self.recipients.clone(),
            subject: alert.subject.clone(),
            html_body: render_html(&alert.body, image.is_some()),
            inline_image: image,
        };

        let recipients = self.recipients.join(", ");
        match transport.send(&mail) {
            Ok(()) => info!(%recipients, subject = %mail.subject, "alert email sent"),
            Err(err) => error!(%recipients, error = %err, "alert email sending failed"),
        }
    }
}
