//! Prefix dispatch for incoming text.
//!
//! `?` asks the data a question, `!` edits existing rows, anything else is a
//! capture. Only the first non-space character counts.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixKind {
    Query,
    Edit,
    Create,
}

#[derive(Debug, Clone)]
pub struct ParsedInput {
    pub kind: PrefixKind,
    /// Input with the prefix stripped and trimmed.
    pub text: String,
    pub original: String,
}

pub fn parse_prefix(input: &str) -> ParsedInput {
    let original = input.to_string();
    let trimmed = input.trim();

    let (kind, text) = match trimmed.chars().next() {
        Some('?') => (PrefixKind::Query, trimmed[1..].trim()),
        Some('!') => (PrefixKind::Edit, trimmed[1..].trim()),
        _ => (PrefixKind::Create, trimmed),
    };

    ParsedInput {
        kind,
        text: text.to_string(),
        original,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_mark_is_query() {
        let parsed = parse_prefix("? wie ist die Email von Tim");
        assert_eq!(parsed.kind, PrefixKind::Query);
        assert_eq!(parsed.text, "wie ist die Email von Tim");
        assert_eq!(parsed.original, "? wie ist die Email von Tim");
    }

    #[test]
    fn bang_is_edit() {
        let parsed = parse_prefix("!Task 3 auf morgen verschieben");
        assert_eq!(parsed.kind, PrefixKind::Edit);
        assert_eq!(parsed.text, "Task 3 auf morgen verschieben");
    }

    #[test]
    fn no_prefix_is_create() {
        let parsed = parse_prefix("Einkaufen gehen");
        assert_eq!(parsed.kind, PrefixKind::Create);
        assert_eq!(parsed.text, "Einkaufen gehen");
    }

    #[test]
    fn leading_whitespace_does_not_change_the_decision() {
        assert_eq!(parse_prefix("   ? frage").kind, PrefixKind::Query);
        assert_eq!(parse_prefix("\t! edit").kind, PrefixKind::Edit);
    }

    #[test]
    fn sigil_not_at_position_zero_is_no_prefix() {
        let parsed = parse_prefix("Das ist wichtig!");
        assert_eq!(parsed.kind, PrefixKind::Create);
        assert_eq!(parsed.text, "Das ist wichtig!");
    }

    #[test]
    fn empty_input_is_create_with_empty_text() {
        let parsed = parse_prefix("   ");
        assert_eq!(parsed.kind, PrefixKind::Create);
        assert_eq!(parsed.text, "");
    }
}
