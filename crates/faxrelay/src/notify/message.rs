use chrono::{DateTime, Local, Utc};

use crate::recognition::RecognitionResult;
use crate::worker::job::{FailureKind, FileHandle};

/// A composed notification, independent of transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub body: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Success,
    FailureAlert,
}

pub fn render_subject(template: &str, file_name: &str) -> String {
    template.replace("{filename}", file_name)
}

fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn push_line(body: &mut String, line: String) {
    body.push_str(&line);
    body.push('\n');
}

pub fn compose_success(
    handle: &FileHandle,
    result: &RecognitionResult,
    page_count: usize,
    subject_template: &str,
) -> OutboundMessage {
    let file_name = handle.file_name();
    let mut body = String::new();

    body.push_str("A fax was received and processed.\n\n");
    push_line(
        &mut body,
        format!("Received:   {}", local_time(handle.modified)),
    );
    push_line(&mut body, format!("File:       {}", file_name));
    push_line(&mut body, format!("Path:       {}", handle.path.display()));
    push_line(&mut body, format!("Size:       {} bytes", handle.size));
    let mime = handle.mime_type();
    push_line(
        &mut body,
        format!("Type:       {}", mime.as_deref().unwrap_or("unknown")),
    );
    push_line(&mut body, format!("Pages:      {}", page_count));
    body.push('\n');

    body.push_str("Recognition\n");
    push_line(&mut body, format!("  Confidence:  {:.2}", result.confidence));
    push_line(
        &mut body,
        format!(
            "  Language:    {}",
            result.language.as_deref().unwrap_or("unknown")
        ),
    );
    push_line(&mut body, format!("  Characters:  {}", result.stats.chars));
    push_line(&mut body, format!("  Words:       {}", result.stats.words));
    push_line(&mut body, format!("  Lines:       {}", result.stats.lines));
    let japanese = if result.stats.has_japanese {
        format!("yes ({:.0}%)", result.stats.japanese_ratio * 100.0)
    } else {
        "no".to_string()
    };
    push_line(&mut body, format!("  Japanese:    {}", japanese));
    body.push('\n');

    body.push_str("---------------- extracted text ----------------\n");
    body.push_str(&result.text);
    body.push_str("\n------------------------------------------------\n");

    OutboundMessage {
        subject: render_subject(subject_template, &file_name),
        body,
        kind: MessageKind::Success,
    }
}

pub fn compose_failure(
    handle: &FileHandle,
    kind: FailureKind,
    error: &str,
    subject_template: &str,
) -> OutboundMessage {
    let file_name = handle.file_name();
    let mut body = String::new();

    body.push_str("A received fax could not be processed.\n\n");
    push_line(&mut body, format!("Time:       {}", local_time(Utc::now())));
    push_line(&mut body, format!("File:       {}", file_name));
    push_line(&mut body, format!("Path:       {}", handle.path.display()));
    push_line(&mut body, format!("Failure:    {}", kind));
    push_line(&mut body, format!("Error:      {}", error));
    body.push_str("\nThe file will be picked up again only if it is modified.\n");

    OutboundMessage {
        subject: render_subject(subject_template, &file_name),
        body,
        kind: MessageKind::FailureAlert,
    }
}
