//! A small SMTP receiver.
//!
//! Every accepted connection gets its own [`Session`], which greets the
//! client, answers the EHLO/HELO, MAIL, RCPT, DATA, STARTTLS and QUIT
//! commands and hands each finished message to a [`Handler`]. STARTTLS
//! upgrades the connection in place; after that every byte goes through
//! the TLS stream.

pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod server;
pub mod session;
pub mod tls;
pub mod transport;
pub mod utils;

pub use config::{Config, Opt};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use handler::{ConsoleHandler, Handler};
pub use server::{Listener, MailServer};
pub use session::Session;
pub use utils::Logger;
