pub const DEFAULT_REPLY_MARKER: char = '#';

#[derive(Debug, Clone, PartialEq, Eq)]
/// Correlation id and answer extracted from an inbound reply.
pub struct ParsedReply {
    pub correlation_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Recognizes `<marker><id> <answer>` replies.
///
/// Parsing is purely syntactic; whether the id refers to a live escalation is
/// decided by the registry.
pub struct ReplyParser {
    marker: char,
}

impl Default for ReplyParser {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_MARKER)
    }
}

impl ReplyParser {
    pub fn new(marker: char) -> Self {
        Self { marker }
    }

    pub fn marker(&self) -> char {
        self.marker
    }

    pub fn parse(&self, text: &str) -> Option<ParsedReply> {
        let rest = text.trim().strip_prefix(self.marker)?;
        let split_at = rest.find(char::is_whitespace)?;
        let (raw_id, raw_answer) = rest.split_at(split_at);
        if raw_id.is_empty() {
            return None;
        }
        let answer = raw_answer.trim();
        if answer.is_empty() {
            return None;
        }
        Some(ParsedReply {
            correlation_id: raw_id.to_ascii_lowercase(),
            answer: answer.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ParsedReply, ReplyParser};

    fn parsed(id: &str, answer: &str) -> Option<ParsedReply> {
        Some(ParsedReply {
            correlation_id: id.to_string(),
            answer: answer.to_string(),
        })
    }

    #[test]
    fn unit_parse_extracts_id_and_answer() {
        let parser = ReplyParser::default();
        assert_eq!(parser.parse("#abc123 yes, proceed"), parsed("abc123", "yes, proceed"));
        assert_eq!(parser.parse("  #ABC123   yes  \n"), parsed("abc123", "yes"));
    }

    #[test]
    fn unit_parse_keeps_multiline_answers() {
        let parser = ReplyParser::default();
        assert_eq!(
            parser.parse("#f00d1\nuse the staging db\nthen redeploy"),
            parsed("f00d1", "use the staging db\nthen redeploy")
        );
    }

    #[test]
    fn unit_parse_ignores_plain_chat_traffic() {
        let parser = ReplyParser::default();
        for text in [
            "",
            "yes, proceed",
            "abc123 yes",
            "# abc123 yes",
            "#abc123",
            "#abc123    ",
            "please see #abc123 yes",
            "/status",
        ] {
            assert_eq!(parser.parse(text), None, "text {text:?} should not parse");
        }
    }

    #[test]
    fn unit_parse_honors_custom_marker() {
        let parser = ReplyParser::new('!');
        assert_eq!(parser.parse("!id7 ok"), parsed("id7", "ok"));
        assert_eq!(parser.parse("#id7 ok"), None);
        assert_eq!(parser.marker(), '!');
    }
}
