use std::sync::LazyLock;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

// Initialize syntax highlighting resources once
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

pub const DEFAULT_HIGHLIGHT_THEME: &str = "base16-ocean.dark";

/// Converts Markdown to HTML.
///
/// Fenced code blocks with a known language are highlighted with the
/// configured syntect theme. With no theme, or an unknown one, code blocks
/// are left to pulldown-cmark.
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    options: Options,
    highlight_theme: Option<String>,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new(Some(DEFAULT_HIGHLIGHT_THEME.to_string()))
    }
}

impl MarkdownRenderer {
    pub fn new(highlight_theme: Option<String>) -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_TASKLISTS);

        let highlight_theme = highlight_theme.filter(|name| {
            let known = THEME_SET.themes.contains_key(name);
            if !known {
                tracing::warn!(theme = %name, "unknown highlight theme, code blocks will not be highlighted");
            }
            known
        });

        Self { options, highlight_theme }
    }

    pub fn render(&self, content: &str) -> String {
        let parser = Parser::new_ext(content, self.options);

        let mut out = String::new();
        match &self.highlight_theme {
            Some(theme) => html::push_html(&mut out, highlight_code_blocks(parser, theme).into_iter()),
            None => html::push_html(&mut out, parser),
        }

        out
    }
}

fn highlight_code_blocks<'a>(parser: Parser<'a>, theme_name: &str) -> Vec<Event<'a>> {
    let events: Vec<Event> = parser.collect();
    let mut processed_events = Vec::with_capacity(events.len());
    let mut i = 0;

    while i < events.len() {
        match &events[i] {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) if !lang.is_empty() => {
                // Info strings may carry more than the language, e.g. "rust,ignore"
                let token = lang
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .next()
                    .unwrap_or_default();

                // Collect all text events until the end of the code block
                let mut code_content = String::new();
                i += 1;
                while i < events.len() {
                    match &events[i] {
                        Event::End(TagEnd::CodeBlock) => break,
                        Event::Text(text) => code_content.push_str(text),
                        _ => {}
                    }
                    i += 1;
                }

                processed_events.push(Event::Html(highlight(&code_content, token, theme_name).into()));
            }
            event => processed_events.push(event.clone()),
        }
        i += 1;
    }

    processed_events
}

fn highlight(code: &str, lang: &str, theme_name: &str) -> String {
    let syntax = SYNTAX_SET.find_syntax_by_token(lang).or_else(|| {
        // Fallback mappings for unsupported languages
        match lang {
            "toml" => SYNTAX_SET.find_syntax_by_name("YAML"),
            _ => None,
        }
    });

    let plain = || {
        format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            html_escape::encode_double_quoted_attribute(lang),
            html_escape::encode_text(code)
        )
    };

    match (syntax, THEME_SET.themes.get(theme_name)) {
        (Some(syntax), Some(theme)) => {
            highlighted_html_for_string(code, &SYNTAX_SET, syntax, theme).unwrap_or_else(|_| plain())
        }
        _ => plain(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_inline_markup() {
        let renderer = MarkdownRenderer::default();
        assert_eq!(renderer.render("Body **text**"), "<p>Body <strong>text</strong></p>\n");
    }

    #[test]
    fn test_render_tables_and_strikethrough() {
        let renderer = MarkdownRenderer::new(None);
        let html = renderer.render("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~gone~~");
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>gone</del>"));
    }

    #[test]
    fn test_code_block_highlighting() {
        let renderer = MarkdownRenderer::default();
        let html = renderer.render("```rust\nfn main() {}\n```\n");
        // syntect emits inline styles on a <pre>
        assert!(html.contains("<pre style="));
        assert!(!html.contains("<code class=\"language-rust\">"));
    }

    #[test]
    fn test_unknown_language_is_escaped() {
        let renderer = MarkdownRenderer::default();
        let html = renderer.render("```nosuchlang\n<b>x</b>\n```\n");
        assert!(html.contains("<code class=\"language-nosuchlang\">&lt;b&gt;x&lt;/b&gt;"));
    }

    #[test]
    fn test_highlighting_disabled() {
        let renderer = MarkdownRenderer::new(None);
        let html = renderer.render("```rust\nfn main() {}\n```\n");
        assert_eq!(html, "<pre><code class=\"language-rust\">fn main() {}\n</code></pre>\n");
    }

    #[test]
    fn test_unknown_theme_disables_highlighting() {
        let renderer = MarkdownRenderer::new(Some("not-a-theme".to_string()));
        let html = renderer.render("```rust\nfn main() {}\n```\n");
        assert!(html.contains("<code class=\"language-rust\">"));
    }
}
