//! MIME envelope assembly.
//!
//! Builds the RFC 5322 message text from a payload and its fetched
//! attachments. The multipart boundary is derived from the message pk, so a
//! retried build is byte-identical.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::DateTime;
use courier_store::ReadyMessage;

use crate::MAIL_ID_HEADER;

/// An attachment with its content already materialized.
#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Guess a MIME type from a filename extension. Unknown extensions fall back
/// to `application/octet-stream`.
#[must_use]
pub fn guess_mime(filename: &str) -> &'static str {
    let extension = filename
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "htm" | "html" => "text/html",
        "csv" => "text/csv",
        "xml" => "text/xml",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "eml" => "message/rfc822",
        _ => "application/octet-stream",
    }
}

/// Build the full message text for one ready message.
///
/// Bcc recipients are deliberately absent from the headers; they only appear
/// in the SMTP envelope.
#[must_use]
pub fn build_mime(message: &ReadyMessage, attachments: &[FetchedAttachment], date: i64) -> String {
    let payload = &message.payload;
    let mut out = String::new();

    push_header(&mut out, "From", &payload.from);
    push_header(&mut out, "To", &payload.to.join(", "));
    if !payload.cc.is_empty() {
        push_header(&mut out, "Cc", &payload.cc.join(", "));
    }
    push_header(&mut out, "Subject", &payload.subject);
    if let Some(date) = DateTime::from_timestamp(date, 0) {
        push_header(&mut out, "Date", &date.to_rfc2822());
    }
    push_header(&mut out, MAIL_ID_HEADER, &message.id);
    for (name, value) in &payload.headers {
        push_header(&mut out, name, value);
    }
    push_header(&mut out, "MIME-Version", "1.0");

    if attachments.is_empty() {
        push_header(
            &mut out,
            "Content-Type",
            &format!("{}; charset=utf-8", payload.content_type),
        );
        out.push_str("\r\n");
        out.push_str(&payload.body);
        return out;
    }

    let boundary = format!("=_courier_{}", message.pk);
    push_header(
        &mut out,
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{boundary}\""),
    );
    out.push_str("\r\n");

    // Body part
    out.push_str(&format!("--{boundary}\r\n"));
    push_header(
        &mut out,
        "Content-Type",
        &format!("{}; charset=utf-8", payload.content_type),
    );
    out.push_str("\r\n");
    out.push_str(&payload.body);
    out.push_str("\r\n");

    for attachment in attachments {
        out.push_str(&format!("--{boundary}\r\n"));
        push_header(
            &mut out,
            "Content-Type",
            &format!(
                "{}; name=\"{}\"",
                guess_mime(&attachment.filename),
                attachment.filename
            ),
        );
        push_header(&mut out, "Content-Transfer-Encoding", "base64");
        push_header(
            &mut out,
            "Content-Disposition",
            &format!("attachment; filename=\"{}\"", attachment.filename),
        );
        out.push_str("\r\n");

        // 76-column base64 per RFC 2045.
        let encoded = STANDARD.encode(&attachment.content);
        for chunk in encoded.as_bytes().chunks(76) {
            out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
            out.push_str("\r\n");
        }
    }
    out.push_str(&format!("--{boundary}--\r\n"));

    out
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

/// Every SMTP envelope recipient: to, cc and bcc.
#[must_use]
pub fn envelope_recipients(message: &ReadyMessage) -> Vec<String> {
    let payload = &message.payload;
    payload
        .to
        .iter()
        .chain(payload.cc.iter())
        .chain(payload.bcc.iter())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use courier_store::{Account, MessagePayload};

    use super::*;

    fn ready(payload: MessagePayload) -> ReadyMessage {
        ReadyMessage {
            pk: "abc123".to_string(),
            id: "m1".to_string(),
            tenant_id: "t1".to_string(),
            account_id: "a1".to_string(),
            priority: 2,
            payload,
            batch_code: None,
            created_at: 1000,
            attempts: 0,
            account: Account::new("t1", "a1", "smtp.example.com", 587),
        }
    }

    fn payload() -> MessagePayload {
        serde_json::from_str(
            r#"{
                "from": "s@e.com",
                "to": ["r@e.com"],
                "cc": ["c@e.com"],
                "bcc": ["hidden@e.com"],
                "subject": "Hi",
                "body": "hello",
                "headers": {"X-Campaign": "welcome"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_simple_message_headers() {
        let message = ready(payload());
        let mime = build_mime(&message, &[], 1_700_000_000);

        assert!(mime.contains("From: s@e.com\r\n"));
        assert!(mime.contains("To: r@e.com\r\n"));
        assert!(mime.contains("Cc: c@e.com\r\n"));
        assert!(mime.contains("Subject: Hi\r\n"));
        assert!(mime.contains("X-Courier-Mail-ID: m1\r\n"));
        assert!(mime.contains("X-Campaign: welcome\r\n"));
        assert!(mime.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(mime.ends_with("\r\nhello"));
        // Bcc never leaks into headers.
        assert!(!mime.contains("hidden@e.com"));
    }

    #[test]
    fn test_envelope_recipients_include_bcc() {
        let message = ready(payload());
        let recipients = envelope_recipients(&message);
        assert_eq!(recipients, vec!["r@e.com", "c@e.com", "hidden@e.com"]);
    }

    #[test]
    fn test_multipart_with_attachment() {
        let message = ready(payload());
        let attachments = vec![FetchedAttachment {
            filename: "doc.pdf".to_string(),
            content: b"%PDF-fake".to_vec(),
        }];
        let mime = build_mime(&message, &attachments, 1_700_000_000);

        assert!(mime.contains("multipart/mixed; boundary=\"=_courier_abc123\""));
        assert!(mime.contains("Content-Type: application/pdf; name=\"doc.pdf\""));
        assert!(mime.contains("Content-Transfer-Encoding: base64"));
        assert!(mime.contains("Content-Disposition: attachment; filename=\"doc.pdf\""));
        assert!(mime.contains(&STANDARD.encode(b"%PDF-fake")));
        assert!(mime.trim_end().ends_with("--=_courier_abc123--"));
    }

    #[test]
    fn test_html_content_type() {
        let mut p = payload();
        p.content_type = "text/html".to_string();
        p.body = "<p>hello</p>".to_string();
        let mime = build_mime(&ready(p), &[], 1_700_000_000);
        assert!(mime.contains("Content-Type: text/html; charset=utf-8\r\n"));
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("report.PDF"), "application/pdf");
        assert_eq!(guess_mime("photo.jpeg"), "image/jpeg");
        assert_eq!(guess_mime("notes.txt"), "text/plain");
        assert_eq!(guess_mime("mystery.bin"), "application/octet-stream");
        assert_eq!(guess_mime("no-extension"), "application/octet-stream");
    }
}
