//! Message parser - Extracts command tokens from prefixed message text

/// Splits prefixed message text into a command name and its remainder
pub struct MessageParser {
    prefixes: Vec<String>,
}

impl MessageParser {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    /// Strip the first matching prefix, if any.
    pub fn strip_prefix<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.prefixes
            .iter()
            .find(|p| !p.is_empty() && text.starts_with(p.as_str()))
            .map(|p| &text[p.len()..])
    }

    /// Leading command token and the rest of the line, when `text` starts
    /// with a recognized prefix. `None` for plain chatter.
    pub fn command_token<'a>(&self, text: &'a str) -> Option<(&'a str, &'a str)> {
        let stripped = self.strip_prefix(text)?;
        let stripped = stripped.trim_start();
        if stripped.is_empty() {
            return None;
        }
        match stripped.split_once(char::is_whitespace) {
            Some((name, rest)) => Some((name, rest.trim_start())),
            None => Some((stripped, "")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> MessageParser {
        MessageParser::new(vec!["!".to_string(), "?".to_string()])
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert!(parser().command_token("hello there").is_none());
    }

    #[test]
    fn extracts_name_and_rest() {
        assert_eq!(parser().command_token("!hello a b"), Some(("hello", "a b")));
        assert_eq!(parser().command_token("?quote"), Some(("quote", "")));
    }

    #[test]
    fn bare_prefix_is_ignored() {
        assert!(parser().command_token("!").is_none());
        assert!(parser().command_token("!   ").is_none());
    }
}
