//! Front-matter extraction.
//!
//! A document may open with a metadata block fenced by `---` (YAML, closed
//! by `---` or `...`) or `+++` (TOML). Everything after the closing fence is
//! the Markdown body. Documents without a block are passed through untouched.

use serde_json::{Map, Value};

pub type Attributes = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum FrontMatterError {
    #[error("invalid YAML front matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid TOML front matter: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("front matter must be a mapping of keys to values")]
    NotAMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Toml,
}

/// Split `content` into its attributes and body.
pub fn split(content: &str) -> Result<(Attributes, &str), FrontMatterError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let Some((first, mut rest)) = next_line(content) else {
        return Ok((Attributes::new(), content));
    };

    let format = match first.trim_end() {
        "---" => Format::Yaml,
        "+++" => Format::Toml,
        _ => return Ok((Attributes::new(), content)),
    };

    let block_start = content.len() - rest.len();
    loop {
        let Some((line, remaining)) = next_line(rest) else {
            // Unclosed fence, treat the whole thing as body
            return Ok((Attributes::new(), content));
        };

        if is_closing_fence(line, format) {
            let block_end = content.len() - rest.len();
            let block = &content[block_start..block_end];
            return Ok((parse_block(block, format)?, remaining));
        }

        rest = remaining;
    }
}

/// Remove the `template` override from `attributes`, if it names one.
pub fn take_template(attributes: &mut Attributes) -> Option<String> {
    match attributes.remove("template") {
        Some(Value::String(name)) if !name.trim().is_empty() => Some(name),
        Some(other) if !other.is_string() && !other.is_null() => {
            // Not a usable template name, keep it visible to templates
            attributes.insert("template".to_string(), other);
            None
        }
        _ => None,
    }
}

fn is_closing_fence(line: &str, format: Format) -> bool {
    let line = line.trim_end();
    match format {
        Format::Yaml => line == "---" || line == "...",
        Format::Toml => line == "+++",
    }
}

fn parse_block(block: &str, format: Format) -> Result<Attributes, FrontMatterError> {
    if block.trim().is_empty() {
        return Ok(Attributes::new());
    }

    let value: Value = match format {
        Format::Yaml => serde_yaml::from_str(block)?,
        Format::Toml => toml_to_json(toml::Value::Table(toml::from_str(block)?)),
    };

    match value {
        Value::Object(map) => Ok(map),
        // A block holding only comments parses to null
        Value::Null => Ok(Attributes::new()),
        _ => Err(FrontMatterError::NotAMapping),
    }
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        // Dates become strings, the same shape YAML front matter produces
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

/// Returns the first line (without its terminator) and everything after it.
fn next_line(text: &str) -> Option<(&str, &str)> {
    if text.is_empty() {
        return None;
    }

    match text.find('\n') {
        Some(idx) => {
            let line = &text[..idx];
            Some((line.strip_suffix('\r').unwrap_or(line), &text[idx + 1..]))
        }
        None => Some((text, "")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_yaml_front_matter() {
        let (attrs, body) = split("---\ndate: 2024-01-01\ntitle: Hello\n---\nBody **text**").unwrap();
        assert_eq!(attrs.get("title"), Some(&json!("Hello")));
        assert_eq!(attrs.get("date"), Some(&json!("2024-01-01")));
        assert_eq!(body, "Body **text**");
    }

    #[test]
    fn test_toml_front_matter() {
        let (attrs, body) = split("+++\ntitle = \"Hello\"\ndate = 2024-01-01\ntags = [\"a\", \"b\"]\n+++\n# Heading\n").unwrap();
        assert_eq!(attrs.get("title"), Some(&json!("Hello")));
        assert_eq!(attrs.get("date"), Some(&json!("2024-01-01")));
        assert_eq!(attrs.get("tags"), Some(&json!(["a", "b"])));
        assert_eq!(body, "# Heading\n");
    }

    #[test]
    fn test_no_front_matter() {
        let input = "# Just markdown\n\nNo metadata here.";
        let (attrs, body) = split(input).unwrap();
        assert!(attrs.is_empty());
        assert_eq!(body, input);
    }

    #[test]
    fn test_unclosed_fence_is_body() {
        let input = "---\ntitle: Hello\nno closing fence";
        let (attrs, body) = split(input).unwrap();
        assert!(attrs.is_empty());
        assert_eq!(body, input);
    }

    #[test]
    fn test_crlf_bom_and_dots_terminator() {
        let (attrs, body) = split("\u{feff}---\r\ntitle: Hi\r\n...\r\nBody\r\n").unwrap();
        assert_eq!(attrs.get("title"), Some(&json!("Hi")));
        assert_eq!(body, "Body\r\n");
    }

    #[test]
    fn test_empty_and_comment_only_blocks() {
        let (attrs, body) = split("---\n---\nBody").unwrap();
        assert!(attrs.is_empty());
        assert_eq!(body, "Body");

        let (attrs, _) = split("---\n# nothing yet\n---\nBody").unwrap();
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_non_mapping_block_is_error() {
        let err = split("---\n- one\n- two\n---\nBody").unwrap_err();
        assert!(matches!(err, FrontMatterError::NotAMapping));
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        assert!(split("---\ntitle: [unterminated\n---\nBody").is_err());
    }

    #[test]
    fn test_take_template() {
        let (mut attrs, _) = split("---\ntemplate: templates/index.njk\ntitle: Home\n---\n").unwrap();
        assert_eq!(take_template(&mut attrs).as_deref(), Some("templates/index.njk"));
        assert!(!attrs.contains_key("template"));
        assert_eq!(attrs.len(), 1);

        let mut none = Attributes::new();
        assert_eq!(take_template(&mut none), None);
    }
}
