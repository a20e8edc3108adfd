use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read feed config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("feed link {link:?} is not an absolute URL: {source}")]
    InvalidLink {
        link: String,
        source: url::ParseError,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Rss,
    Atom,
}

/// Site-wide feed metadata. Also exposed to every template as `feed`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FeedConfig {
    #[serde(default)]
    pub title: String,
    /// Base URL every page link is resolved against.
    pub link: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub format: FeedFormat,
    /// Anything else in the file, passed through to templates.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FeedConfig {
    pub fn new<S: Into<String>>(title: S, link: S) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            description: None,
            language: None,
            copyright: None,
            author: None,
            format: FeedFormat::default(),
            extra: BTreeMap::new(),
        }
    }

    /// Read a feed config, choosing the parser from the file extension.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let config: FeedConfig = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&data)?,
            "toml" => toml::from_str(&data)?,
            _ => serde_json::from_str(&data)?,
        };

        config.base_url()?;
        Ok(config)
    }

    /// The parsed `link`.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.link).map_err(|source| ConfigError::InvalidLink {
            link: self.link.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        fs::write(&path, r#"{ "title": "Blog", "link": "https://example.com/", "id": "blog" }"#).unwrap();

        let config = FeedConfig::read(&path).unwrap();
        assert_eq!(config.title, "Blog");
        assert_eq!(config.link, "https://example.com/");
        assert_eq!(config.format, FeedFormat::Rss);
        assert_eq!(config.extra.get("id"), Some(&serde_json::json!("blog")));
    }

    #[test]
    fn test_read_yaml_and_toml() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("feed.yml");
        fs::write(&yaml, "title: Blog\nlink: https://example.com/\nformat: atom\n").unwrap();
        let config = FeedConfig::read(&yaml).unwrap();
        assert_eq!(config.format, FeedFormat::Atom);

        let toml = dir.path().join("feed.toml");
        fs::write(&toml, "title = \"Blog\"\nlink = \"https://example.com/\"\nlanguage = \"en\"\n").unwrap();
        let config = FeedConfig::read(&toml).unwrap();
        assert_eq!(config.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_missing_file() {
        let err = FeedConfig::read("/definitely/not/here/feed.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_missing_or_relative_link() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");

        fs::write(&path, r#"{ "title": "Blog" }"#).unwrap();
        assert!(matches!(FeedConfig::read(&path).unwrap_err(), ConfigError::Json(_)));

        fs::write(&path, r#"{ "title": "Blog", "link": "/blog/" }"#).unwrap();
        assert!(matches!(FeedConfig::read(&path).unwrap_err(), ConfigError::InvalidLink { .. }));
    }
}
