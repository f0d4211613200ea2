/// One message as it is collected on a connection.
///
/// The session fills it through MAIL, RCPT and DATA and takes it out as a
/// whole once the terminator line arrives, leaving an empty envelope behind
/// for the next message on the same connection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Envelope {
    sender: Option<String>,
    recipients: Vec<String>,
    body: Vec<u8>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// A repeated MAIL replaces the previous sender.
    pub fn set_sender(&mut self, sender: String) {
        self.sender = Some(sender);
    }

    pub fn add_recipient(&mut self, recipient: String) {
        self.recipients.push(recipient);
    }

    /// Appends one DATA line exactly as received, line ending included.
    pub fn push_body_line(&mut self, line: &[u8]) {
        self.body.extend_from_slice(line);
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_none() && self.recipients.is_empty() && self.body.is_empty()
    }

    pub fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
        self.body.clear();
    }

    /// Moves the collected message out and leaves a fresh envelope in place.
    pub fn take(&mut self) -> Envelope {
        std::mem::take(self)
    }
}
