use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::frontmatter::Attributes;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("{} is not inside the root directory {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("cannot resolve {pathname:?} against {base}: {source}")]
    Link {
        pathname: String,
        base: String,
        source: url::ParseError,
    },
    #[error("unrecognised date {0:?}, expected RFC 3339 or YYYY-MM-DD")]
    InvalidDate(String),
}

/// Where a source file lands and how the feed refers to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    /// Root-relative path without extension, `/`-separated.
    pub pathname: String,
    pub link: String,
    pub id: String,
}

impl Location {
    pub fn derive(source: &Path, root: &Path, base: &Url) -> Result<Self, MetadataError> {
        let pathname = pathname(source, root)?;
        let link = base
            .join(&pathname)
            .map_err(|source| MetadataError::Link {
                pathname: pathname.clone(),
                base: base.to_string(),
                source,
            })?
            .to_string();
        let id = link_id(&link);

        Ok(Self { pathname, link, id })
    }

    /// `pathname/index.html`, relative to the output directory.
    pub fn out_path(&self) -> PathBuf {
        PathBuf::from(&self.pathname).join("index.html")
    }
}

/// One rendered Markdown source.
#[derive(Debug, Clone)]
pub struct Page {
    pub source: PathBuf,
    pub location: Location,
    pub html: String,
    pub attributes: Attributes,
    /// Template name, already resolved against the default.
    pub template: String,
    pub date: Option<DateTime<FixedOffset>>,
}

impl Page {
    pub fn title(&self) -> Option<&str> {
        self.attributes.get("title").and_then(Value::as_str)
    }

    pub fn summary(&self) -> PageSummary<'_> {
        PageSummary {
            pathname: &self.location.pathname,
            link: &self.location.link,
            id: &self.location.id,
            date: self.date.map(|d| d.to_rfc3339()),
            title: self.title(),
            attributes: &self.attributes,
        }
    }
}

/// What templates see of a page, both as `page` and inside `pages`.
#[derive(Debug, Serialize)]
pub struct PageSummary<'a> {
    pub pathname: &'a str,
    pub link: &'a str,
    pub id: &'a str,
    pub date: Option<String>,
    pub title: Option<&'a str>,
    pub attributes: &'a Attributes,
}

/// `path` relative to `root`.
pub fn relative_to_root(path: &Path, root: &Path) -> Result<PathBuf, MetadataError> {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| MetadataError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
}

/// Resolve `.` and `..` lexically, without touching the file system.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other),
        }
    }
    cleaned
}

/// Root-relative path of `source` with the extension stripped.
pub fn pathname(source: &Path, root: &Path) -> Result<String, MetadataError> {
    let parts: Vec<String> = relative_to_root(source, root)?
        .with_extension("")
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    Ok(parts.join("/"))
}

/// Hex MD5 of the link, used as the feed guid.
pub fn link_id(link: &str) -> String {
    hex::encode(Md5::digest(link.as_bytes()))
}

/// Parse a front-matter `date` value.
pub fn parse_date(value: &Value) -> Result<DateTime<FixedOffset>, MetadataError> {
    let raw = match value {
        Value::String(s) => s.trim(),
        other => return Err(MetadataError::InvalidDate(other.to_string())),
    };

    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Ok(date);
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }

    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc().fixed_offset());
    }

    Err(MetadataError::InvalidDate(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[test]
    fn test_location_for_post() {
        let location = Location::derive(
            Path::new("/site/posts/first-post.md"),
            Path::new("/site"),
            &base(),
        )
        .unwrap();

        assert_eq!(location.pathname, "posts/first-post");
        assert_eq!(location.link, "https://example.com/posts/first-post");
        assert_eq!(location.id, link_id("https://example.com/posts/first-post"));
        assert_eq!(location.out_path(), PathBuf::from("posts/first-post/index.html"));
    }

    #[test]
    fn test_link_resolves_against_base_path() {
        let base = Url::parse("https://example.com/blog/").unwrap();
        let location = Location::derive(Path::new("site/a/b.md"), Path::new("site"), &base).unwrap();
        assert_eq!(location.link, "https://example.com/blog/a/b");
    }

    #[test]
    fn test_outside_root() {
        let err = Location::derive(Path::new("/elsewhere/a.md"), Path::new("/site"), &base()).unwrap_err();
        assert!(matches!(err, MetadataError::OutsideRoot { .. }));
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/site/./posts/../posts/a.md")), PathBuf::from("/site/posts/a.md"));
        assert_eq!(clean_path(Path::new("/site/posts/..")), PathBuf::from("/site"));
        assert_eq!(clean_path(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(clean_path(Path::new("../../a")), PathBuf::from("../../a"));
    }

    #[test]
    fn test_link_id_is_md5_hex() {
        // md5("") is well known
        assert_eq!(link_id(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(link_id("https://example.com/a").len(), 32);
    }

    #[test]
    fn test_parse_dates() {
        let day = parse_date(&json!("2024-01-01")).unwrap();
        assert_eq!(day.to_rfc3339(), "2024-01-01T00:00:00+00:00");

        let stamp = parse_date(&json!("2024-01-01T10:30:00+02:00")).unwrap();
        assert_eq!(stamp.to_rfc3339(), "2024-01-01T10:30:00+02:00");

        let naive = parse_date(&json!("2024-03-05 08:00:00")).unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-03-05T08:00:00+00:00");
    }

    #[test]
    fn test_parse_invalid_dates() {
        assert!(matches!(parse_date(&json!("yesterday")), Err(MetadataError::InvalidDate(_))));
        assert!(matches!(parse_date(&json!(20240101)), Err(MetadataError::InvalidDate(_))));
    }
}
