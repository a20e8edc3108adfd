//! Feed and sitemap generation.
//!
//! Only dated pages become feed items. Items are ordered newest first; pages
//! sharing a date keep the order they were discovered in.

use std::io::Cursor;

use chrono::{DateTime, FixedOffset};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::Value;

use crate::config::{FeedConfig, FeedFormat};
use crate::site::Page;

const GENERATOR: &str = concat!("upwrite ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to write feed XML: {0}")]
    Xml(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub id: String,
    pub date: DateTime<FixedOffset>,
    pub description: Option<String>,
    pub content: String,
    pub author: Option<String>,
    pub categories: Vec<String>,
}

impl FeedItem {
    /// Build an item from a page, or `None` when the page has no date.
    pub fn from_page(page: &Page) -> Option<Self> {
        let date = page.date?;
        let attrs = &page.attributes;

        let text = |key: &str| attrs.get(key).and_then(Value::as_str).map(str::to_string);

        let mut categories = Vec::new();
        for key in ["categories", "tags"] {
            match attrs.get(key) {
                Some(Value::Array(values)) => {
                    categories.extend(values.iter().filter_map(Value::as_str).map(str::to_string))
                }
                Some(Value::String(value)) => categories.push(value.clone()),
                _ => {}
            }
        }

        Some(Self {
            title: text("title").unwrap_or_else(|| page.location.pathname.clone()),
            link: page.location.link.clone(),
            id: page.location.id.clone(),
            date,
            description: text("description"),
            content: page.html.clone(),
            author: text("author"),
            categories,
        })
    }
}

pub struct Feed {
    config: FeedConfig,
    items: Vec<FeedItem>,
}

impl Feed {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            items: Vec::new(),
        }
    }

    pub fn add_item(&mut self, item: FeedItem) {
        self.items.push(item);
    }

    /// Add every dated page. Returns how many were skipped for lacking a date.
    pub fn add_pages<'a, I>(&mut self, pages: I) -> usize
    where
        I: IntoIterator<Item = &'a Page>,
    {
        let mut skipped = 0;
        for page in pages {
            match FeedItem::from_page(page) {
                Some(item) => self.add_item(item),
                None => {
                    tracing::debug!(page = %page.location.pathname, "no date, left out of the feed");
                    skipped += 1;
                }
            }
        }
        skipped
    }

    /// Items, newest first.
    pub fn items(&mut self) -> &[FeedItem] {
        self.sort();
        &self.items
    }

    pub fn to_xml(&mut self) -> Result<String, FeedError> {
        self.sort();
        match self.config.format {
            FeedFormat::Rss => self.rss2(),
            FeedFormat::Atom => self.atom1(),
        }
    }

    /// Site root first, then every item link.
    pub fn sitemap(&mut self) -> String {
        self.sort();
        let mut out = String::new();
        out.push_str(&self.config.link);
        out.push('\n');
        for item in &self.items {
            out.push_str(&item.link);
            out.push('\n');
        }
        out
    }

    fn sort(&mut self) {
        // Stable, so equal dates keep insertion order
        self.items.sort_by(|a, b| b.date.cmp(&a.date));
    }

    fn updated(&self) -> Option<DateTime<FixedOffset>> {
        self.items.iter().map(|item| item.date).max()
    }

    fn rss2(&self) -> Result<String, FeedError> {
        let mut xml = XmlWriter::new();
        xml.decl()?;

        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        rss.push_attribute(("xmlns:content", "http://purl.org/rss/1.0/modules/content/"));
        rss.push_attribute(("xmlns:dc", "http://purl.org/dc/elements/1.1/"));
        xml.start(rss)?;
        xml.start(BytesStart::new("channel"))?;

        let config = &self.config;
        xml.text_element("title", &config.title)?;
        xml.text_element("link", &config.link)?;
        xml.text_element("description", config.description.as_deref().unwrap_or_default())?;
        if let Some(updated) = self.updated() {
            xml.text_element("lastBuildDate", &updated.to_rfc2822())?;
        }
        xml.text_element("docs", "https://validator.w3.org/feed/docs/rss2.html")?;
        xml.text_element("generator", GENERATOR)?;
        if let Some(language) = &config.language {
            xml.text_element("language", language)?;
        }
        if let Some(copyright) = &config.copyright {
            xml.text_element("copyright", copyright)?;
        }

        for item in &self.items {
            xml.start(BytesStart::new("item"))?;
            xml.text_element("title", &item.title)?;
            xml.text_element("link", &item.link)?;

            let mut guid = BytesStart::new("guid");
            guid.push_attribute(("isPermaLink", "false"));
            xml.start(guid)?;
            xml.text(&item.id)?;
            xml.end("guid")?;

            xml.text_element("pubDate", &item.date.to_rfc2822())?;
            if let Some(description) = &item.description {
                xml.text_element("description", description)?;
            }
            xml.text_element("content:encoded", &item.content)?;
            // RSS <author> must be an email address; plain names go to dc:creator
            if let Some(author) = item.author.as_ref().or(config.author.as_ref()) {
                let element = if author.contains('@') { "author" } else { "dc:creator" };
                xml.text_element(element, author)?;
            }
            for category in &item.categories {
                xml.text_element("category", category)?;
            }
            xml.end("item")?;
        }

        xml.end("channel")?;
        xml.end("rss")?;
        xml.finish()
    }

    fn atom1(&self) -> Result<String, FeedError> {
        let mut xml = XmlWriter::new();
        xml.decl()?;

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", "http://www.w3.org/2005/Atom"));
        xml.start(feed)?;

        let config = &self.config;
        xml.text_element("id", &config.link)?;
        xml.text_element("title", &config.title)?;
        if let Some(updated) = self.updated() {
            xml.text_element("updated", &updated.to_rfc3339())?;
        }
        xml.text_element("generator", GENERATOR)?;
        xml.empty_link(&config.link)?;
        if let Some(description) = &config.description {
            xml.text_element("subtitle", description)?;
        }
        if let Some(copyright) = &config.copyright {
            xml.text_element("rights", copyright)?;
        }
        if let Some(author) = &config.author {
            xml.author(author)?;
        }

        for item in &self.items {
            xml.start(BytesStart::new("entry"))?;
            xml.text_element("title", &item.title)?;
            // Atom ids must be IRIs
            xml.text_element("id", &item.link)?;
            xml.empty_link(&item.link)?;
            xml.text_element("updated", &item.date.to_rfc3339())?;
            xml.text_element("published", &item.date.to_rfc3339())?;
            if let Some(description) = &item.description {
                xml.text_element("summary", description)?;
            }

            let mut content = BytesStart::new("content");
            content.push_attribute(("type", "html"));
            xml.start(content)?;
            xml.text(&item.content)?;
            xml.end("content")?;

            if let Some(author) = &item.author {
                xml.author(author)?;
            }
            for category in &item.categories {
                let mut element = BytesStart::new("category");
                element.push_attribute(("term", category.as_str()));
                xml.event(Event::Empty(element))?;
            }
            xml.end("entry")?;
        }

        xml.end("feed")?;
        xml.finish()
    }
}

struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), FeedError> {
        self.writer
            .write_event(event)
            .map_err(|e| FeedError::Xml(e.to_string()))
    }

    fn decl(&mut self) -> Result<(), FeedError> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
    }

    fn start(&mut self, element: BytesStart<'_>) -> Result<(), FeedError> {
        self.event(Event::Start(element))
    }

    fn end(&mut self, name: &str) -> Result<(), FeedError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, text: &str) -> Result<(), FeedError> {
        self.event(Event::Text(BytesText::new(text)))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), FeedError> {
        self.start(BytesStart::new(name))?;
        self.text(text)?;
        self.end(name)
    }

    fn empty_link(&mut self, href: &str) -> Result<(), FeedError> {
        let mut link = BytesStart::new("link");
        link.push_attribute(("href", href));
        self.event(Event::Empty(link))
    }

    fn author(&mut self, name: &str) -> Result<(), FeedError> {
        self.start(BytesStart::new("author"))?;
        self.text_element("name", name)?;
        self.end("author")
    }

    fn finish(self) -> Result<String, FeedError> {
        let mut bytes = self.writer.into_inner().into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(|e| FeedError::Xml(e.to_string()))
    }
}
