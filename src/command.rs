/// SMTP verbs the session knows how to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Ehlo,
    Helo,
    Mail,
    Rcpt,
    Data,
    StartTls,
    Quit,
    /// Anything else, upper-cased. VRFY, NOOP and RSET land here too.
    Unknown(String),
}

impl Verb {
    fn from_word(word: &str) -> Self {
        match word.to_ascii_uppercase().as_str() {
            "EHLO" => Verb::Ehlo,
            "HELO" => Verb::Helo,
            "MAIL" => Verb::Mail,
            "RCPT" => Verb::Rcpt,
            "DATA" => Verb::Data,
            "STARTTLS" => Verb::StartTls,
            "QUIT" => Verb::Quit,
            other => Verb::Unknown(other.to_string()),
        }
    }
}

/// A command line split into its verb and the untouched rest of the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
    pub verb: Verb,
    pub argument: &'a str,
}

impl<'a> Command<'a> {
    /// Returns `None` for a line holding nothing but whitespace.
    pub fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (word, argument) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None => (line, ""),
        };

        Some(Command {
            verb: Verb::from_word(word),
            argument,
        })
    }
}

/// Extracts the address from a MAIL or RCPT argument.
///
/// `label` is `FROM:` or `TO:`; it is matched case-insensitively and may be
/// missing, as may the angle brackets. Parameters after the path are dropped.
pub fn parse_path(argument: &str, label: &str) -> String {
    let mut rest = argument.trim();

    if rest.len() >= label.len()
        && rest.is_char_boundary(label.len())
        && rest[..label.len()].eq_ignore_ascii_case(label)
    {
        rest = rest[label.len()..].trim_start();
    }

    if let Some(inner) = rest.strip_prefix('<') {
        return match inner.find('>') {
            Some(end) => inner[..end].trim().to_string(),
            None => inner.trim().to_string(),
        };
    }

    rest.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('>')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_are_case_insensitive() {
        let command = Command::parse("ehlo client.example").unwrap();
        assert_eq!(command.verb, Verb::Ehlo);
        assert_eq!(command.argument, "client.example");

        assert_eq!(Command::parse("StartTLS").unwrap().verb, Verb::StartTls);
        assert_eq!(Command::parse("quit\r\n").unwrap().verb, Verb::Quit);
    }

    #[test]
    fn argument_keeps_inner_spacing() {
        let command = Command::parse("MAIL   FROM:<a@b> SIZE=10\r\n").unwrap();
        assert_eq!(command.verb, Verb::Mail);
        assert_eq!(command.argument, "FROM:<a@b> SIZE=10");
    }

    #[test]
    fn blank_lines_are_not_commands() {
        assert_eq!(Command::parse("\r\n"), None);
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn unsupported_verbs_are_unknown() {
        assert_eq!(
            Command::parse("noop").unwrap().verb,
            Verb::Unknown("NOOP".to_string())
        );
        assert_eq!(
            Command::parse("FOOBAR").unwrap().verb,
            Verb::Unknown("FOOBAR".to_string())
        );
    }

    #[test]
    fn paths_are_stripped_best_effort() {
        assert_eq!(parse_path("FROM:<a@b>", "FROM:"), "a@b");
        assert_eq!(parse_path("from: <a@b>", "FROM:"), "a@b");
        assert_eq!(parse_path("FROM:a@b", "FROM:"), "a@b");
        assert_eq!(parse_path("<a@b>", "FROM:"), "a@b");
        assert_eq!(parse_path("a@b", "FROM:"), "a@b");
        assert_eq!(parse_path("TO:<c@d> NOTIFY=NEVER", "TO:"), "c@d");
        assert_eq!(parse_path("FROM:<a@b", "FROM:"), "a@b");
        assert_eq!(parse_path("FROM:<>", "FROM:"), "");
        assert_eq!(parse_path("", "TO:"), "");
    }
}
