use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Keeps printable ASCII and whitespace, drops everything else.
pub fn filter_printable_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_graphic() || c.is_ascii_whitespace())
        .collect()
}

/// Turns control characters into escape sequences so a log file stays one
/// entry per line of text.
pub fn safe_log_string(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\0' => result.push_str("\\0"),
            '\x01'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f' | '\x7f' => {
                result.push_str(&format!("\\x{:02x}", c as u32));
            }
            _ if c.is_ascii_graphic() || c.is_ascii_whitespace() => result.push(c),
            _ => result.push_str(&format!("\\u{{{:x}}}", c as u32)),
        }
    }
    result
}

/// Timestamped per-peer log lines on stdout and, optionally, in a file.
///
/// Cloning is cheap; clones share the same file handle.
#[derive(Clone)]
pub struct Logger {
    writer: Option<Arc<Mutex<BufWriter<File>>>>,
    console: bool,
    raw_display: bool,
    verbose: bool,
}

impl Logger {
    pub fn new(log_file: Option<PathBuf>, raw_display: bool, verbose: bool) -> anyhow::Result<Self> {
        let writer = if let Some(path) = log_file {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let file = OpenOptions::new().create(true).append(true).open(path)?;

            Some(Arc::new(Mutex::new(BufWriter::new(file))))
        } else {
            None
        };

        Ok(Self {
            writer,
            console: true,
            raw_display,
            verbose,
        })
    }

    /// A logger that writes nowhere.
    pub fn disabled() -> Self {
        Self {
            writer: None,
            console: false,
            raw_display: false,
            verbose: false,
        }
    }

    pub async fn log(&self, client_addr: &SocketAddr, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

        if self.console {
            let log_line = format!("{} {} {}\n", timestamp, client_addr, message);
            if self.raw_display {
                print!("{}", log_line);
            } else {
                print!("{}", filter_printable_chars(&log_line));
            }
        }

        if let Some(writer) = &self.writer {
            let mut writer = writer.lock().await;
            let file_line = format!("{} {} {}\n", timestamp, client_addr, safe_log_string(message));
            let _ = writer.write_all(file_line.as_bytes());
            let _ = writer.flush();
        }
    }

    /// Framed block with the full text of a command or reply. No-op unless verbose.
    pub async fn log_verbose(&self, client_addr: &SocketAddr, title: &str, details: &str) {
        if !self.verbose {
            return;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let separator = "─".repeat(60);
        let frame = |details: &str| {
            format!(
                "{}\n{} VERBOSE: {} {}\n{}\n{}\n{}\n\n",
                separator, timestamp, client_addr, title, separator, details, separator
            )
        };

        if self.console {
            if self.raw_display {
                print!("{}", frame(details));
            } else {
                // the separator is not ASCII, so filter the details only
                print!("{}", frame(&safe_log_string(details)));
            }
        }

        if let Some(writer) = &self.writer {
            let mut writer = writer.lock().await;
            let _ = writer.write_all(frame(&safe_log_string(details)).as_bytes());
            let _ = writer.flush();
        }
    }
}
