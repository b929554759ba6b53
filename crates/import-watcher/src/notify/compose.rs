//! Alert wording. Every template is a pure function of the outcome and the
//! node context so the same stall always produces the same mail.

use crate::watch::StallOutcome;

/// Content identifier the HTML body uses to reference the inline graphic.
pub const INLINE_IMAGE_CID: &str = "meme_image";

/// Node-level values woven into every alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertContext {
    pub node_name: String,
    pub pipeline_label: String,
    pub old_folder_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    ServiceDown,
    Restored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub subject: String,
    pub body: String,
    pub top_caption: String,
    pub bottom_caption: String,
}

/// Builds the alert for outcomes operators hear about; `None` otherwise.
pub fn compose(outcome: &StallOutcome, context: &AlertContext) -> Option<Alert> {
    let AlertContext {
        node_name: node,
        pipeline_label: label,
        old_folder_name,
    } = context;

    match outcome {
        StallOutcome::ServiceDown { file, service } => Some(Alert {
            kind: AlertKind::ServiceDown,
            subject: format!(
                "{label} is Not Processing Dicom Images on {node} (Service Not Running)"
            ),
            body: format!(
                "{label} is Not Processing DCM files (Service Not Running)\n\
                 File: {} is still waiting to be processed\n\
                 Service {service} is not Running. Please investigate.",
                file.display()
            ),
            top_caption: "ONE DOES NOT SIMPLY".to_string(),
            bottom_caption: format!("Resume Processing Dicom Files on {node}"),
        }),
        StallOutcome::Relocated { file, .. } => {
            let headline = format!("{label} Dicom Image Processing Restored on {node}");
            Some(Alert {
                kind: AlertKind::Restored,
                subject: headline.clone(),
                body: format!(
                    "{headline}\nFile: {} was moved to the {old_folder_name} folder.",
                    file.display()
                ),
                top_caption: headline,
                bottom_caption: String::new(),
            })
        }
        StallOutcome::NothingPending
        | StallOutcome::Resolved { .. }
        | StallOutcome::RelocationFailed { .. } => None,
    }
}

/// Wraps the plain-text body in HTML, escaping markup and turning newlines
/// into line breaks. The image tag is only emitted when a graphic is attached.
pub fn render_html(body: &str, has_image: bool) -> String {
    let safe_body = escape_html(body).replace('\n', "<br>");
    let image = if has_image {
        format!("<img src='cid:{INLINE_IMAGE_CID}' alt='Meme'>")
    } else {
        String::new()
    };
    format!("<html>\n  <body>\n    <p>{safe_body}</p>\n    {image}\n  </body>\n</html>\n")
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context() -> AlertContext {
        AlertContext {
            node_name: "PACS01".to_string(),
            pipeline_label: "AQNET Import".to_string(),
            old_folder_name: "Import_old".to_string(),
        }
    }

    #[test]
    fn service_down_alert_names_node_file_and_service() {
        let outcome = StallOutcome::ServiceDown {
            file: PathBuf::from("/cache/Import/study/a.dcm"),
            service: "ImportSvc".to_string(),
        };
        let alert = compose(&outcome, &context()).expect("alert composed");

        assert_eq!(alert.kind, AlertKind::ServiceDown);
        assert_eq!(
            alert.subject,
            "AQNET Import is Not Processing Dicom Images on PACS01 (Service Not Running)"
        );
        assert!(alert.body.contains("/cache/Import/study/a.dcm"));
        assert!(alert.body.contains("Service ImportSvc is not Running"));
        assert_eq!(alert.bottom_caption, "Resume Processing Dicom Files on PACS01");
    }

    #[test]
    fn relocated_alert_mentions_old_folder() {
        let outcome = StallOutcome::Relocated {
            file: PathBuf::from("/cache/Import/study/a.dcm"),
            destination: PathBuf::from("/cache/Import_old/a.dcm"),
        };
        let alert = compose(&outcome, &context()).expect("alert composed");

        assert_eq!(alert.kind, AlertKind::Restored);
        assert!(alert.subject.contains("Restored on PACS01"));
        assert!(alert.body.ends_with("was moved to the Import_old folder."));
        assert_eq!(alert.top_caption, alert.subject);
        assert!(alert.bottom_caption.is_empty());
    }

    #[test]
    fn quiet_outcomes_have_no_alert() {
        assert!(compose(&StallOutcome::NothingPending, &context()).is_none());
        assert!(compose(
            &StallOutcome::Resolved {
                file: PathBuf::from("a.dcm")
            },
            &context()
        )
        .is_none());
    }

    #[test]
    fn html_body_escapes_and_references_image() {
        let html = render_html("File: <a&b>\nnext", true);
        assert!(html.contains("File: &lt;a&amp;b&gt;<br>next"));
        assert!(html.contains("cid:meme_image"));

        let plain = render_html("body", false);
        assert!(!plain.contains("<img"));
    }
}
