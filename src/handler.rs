use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::Local;

use crate::utils::filter_printable_chars;

/// Consumes a finished message and produces the reply to its DATA command.
///
/// Called on tokio's blocking pool, so it may do blocking I/O. An `Err`
/// (or a panic) is answered with `500 Error processing message`.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, sender: Option<&str>, recipients: &[String], body: &[u8]) -> Result<String>;
}

impl<F> Handler for F
where
    F: Fn(Option<&str>, &[String], &[u8]) -> Result<String> + Send + Sync + 'static,
{
    fn handle(&self, sender: Option<&str>, recipients: &[String], body: &[u8]) -> Result<String> {
        self(sender, recipients, body)
    }
}

pub const ACCEPTED: &str = "250 Message accepted for delivery";

/// Prints every received message to stdout and optionally keeps a copy.
pub struct ConsoleHandler {
    raw_display: bool,
    data_dir: Option<PathBuf>,
    sequence: AtomicU64,
}

impl ConsoleHandler {
    pub fn new(raw_display: bool, data_dir: Option<PathBuf>) -> Self {
        Self {
            raw_display,
            data_dir,
            sequence: AtomicU64::new(0),
        }
    }

    fn display(&self, text: &str) -> String {
        if self.raw_display {
            text.to_string()
        } else {
            filter_printable_chars(text)
        }
    }

    /// Writes `<timestamp>_<sequence>.eml` into the data directory.
    fn save(&self, sender: Option<&str>, recipients: &[String], body: &[u8]) -> Result<Option<PathBuf>> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(None);
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let now = Local::now();
        let filepath = data_dir.join(format!("{}_{:04}.eml", now.format("%Y%m%d_%H%M%S"), sequence));

        let mut content = Vec::with_capacity(body.len() + 256);
        content.extend_from_slice(format!("X-Mailsink-Date: {}\r\n", now.format("%Y-%m-%d %H:%M:%S")).as_bytes());
        content.extend_from_slice(format!("X-Mailsink-MailFrom: {}\r\n", sender.unwrap_or("")).as_bytes());
        for rcpt in recipients {
            content.extend_from_slice(format!("X-Mailsink-RcptTo: {}\r\n", rcpt).as_bytes());
        }
        content.extend_from_slice(body);

        std::fs::write(&filepath, content).with_context(|| format!("Failed to save email to {:?}", filepath))?;
        Ok(Some(filepath))
    }
}

impl Handler for ConsoleHandler {
    fn handle(&self, sender: Option<&str>, recipients: &[String], body: &[u8]) -> Result<String> {
        let saved = self.save(sender, recipients, body)?;

        let message = String::from_utf8_lossy(body);
        let (headers, text) = split_message(&message);
        let subject = header_value(headers, "Subject").unwrap_or_else(|| "(no subject)".to_string());
        let text = text.trim();

        let separator = "=".repeat(60);
        let rule = "-".repeat(60);
        println!("\n{}", separator);
        println!("NEW EMAIL RECEIVED");
        println!("{}", rule);
        println!("From: {}", self.display(sender.unwrap_or("")));
        println!("To: {}", self.display(&recipients.join(", ")));
        println!("Subject: {}", self.display(&subject));
        if let Some(path) = saved {
            println!("Saved: {:?}", path);
        }
        println!("{}", rule);
        println!("Body:");
        println!("{}", if text.is_empty() { "(empty body)".to_string() } else { self.display(text) });
        println!("{}\n", separator);

        Ok(ACCEPTED.to_string())
    }
}

/// Splits a raw message at the first empty line into header block and body.
/// A message without an empty line is all headers.
fn split_message(message: &str) -> (&str, &str) {
    for separator in ["\r\n\r\n", "\n\n"] {
        if let Some(at) = message.find(separator) {
            return (&message[..at], &message[at + separator.len()..]);
        }
    }
    if message.starts_with("\r\n") || message.starts_with('\n') {
        return ("", message);
    }
    (message, "")
}

/// Value of the first header called `name`, with folded lines joined.
fn header_value(headers: &str, name: &str) -> Option<String> {
    let mut lines = headers.lines().peekable();
    while let Some(line) = lines.next() {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        if line.starts_with([' ', '\t']) || !field.trim().eq_ignore_ascii_case(name) {
            continue;
        }

        let mut value = value.trim().to_string();
        while let Some(next) = lines.peek() {
            if !next.starts_with([' ', '\t']) {
                break;
            }
            value.push(' ');
            value.push_str(next.trim());
            lines.next();
        }
        return Some(value);
    }
    None
}
