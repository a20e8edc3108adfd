use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt, TryStreamExt};
use tera::Context;
use url::Url;

use crate::config::{ConfigError, FeedConfig};
use crate::feed::{Feed, FeedError};
use crate::frontmatter::{self, FrontMatterError};
use crate::markdown::{DEFAULT_HIGHLIGHT_THEME, MarkdownRenderer};
use crate::scanner::{ScanError, SiteScanner};
use crate::site::{self, Location, MetadataError, Page, PageSummary};
use crate::template::{BoxedFilter, TemplateError, TemplateRenderer};

pub const DEFAULT_CONCURRENCY: usize = 32;

/// Context keys set by the builder. Front-matter attributes with these names
/// stay reachable through `fm` only.
const RESERVED_KEYS: [&str; 6] = ["html", "fm", "md", "page", "pages", "feed"];

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("cannot resolve root directory {}: {source}", path.display())]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    FrontMatter {
        path: PathBuf,
        source: FrontMatterError,
    },
    #[error("{}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        source: MetadataError,
    },
    #[error("failed to render {}: {source}", path.display())]
    Render {
        path: PathBuf,
        source: TemplateError,
    },
    #[error("{} and {} would both be written to {}", first.display(), second.display(), output.display())]
    Collision {
        output: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },
}

/// What a build produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub pages: usize,
    pub feed_items: usize,
    pub assets: usize,
    pub feed_path: PathBuf,
    pub sitemap_path: PathBuf,
}

pub struct SiteBuilder {
    root_dir: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
    feed_config: PathBuf,
    template: String,
    concurrency: usize,
    copy_assets: bool,
    highlight_theme: Option<String>,
    filters: Vec<(String, BoxedFilter)>,
}

impl Default for SiteBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteBuilder {
    pub fn new() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            input_dir: PathBuf::from("posts"),
            output_dir: PathBuf::from("_site"),
            feed_config: PathBuf::from("feed.json"),
            template: "templates/post.njk".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            copy_assets: true,
            highlight_theme: Some(DEFAULT_HIGHLIGHT_THEME.to_string()),
            filters: Vec::new(),
        }
    }

    /// Directory every other relative path is resolved against.
    pub fn root_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.root_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn input_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.input_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn output_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_dir = path.as_ref().to_path_buf();
        self
    }

    /// Feed config file. Its stem also names the feed XML (`feed.json` -> `feed.xml`).
    pub fn feed_config<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.feed_config = path.as_ref().to_path_buf();
        self
    }

    /// Default template, used unless a page's front matter names another.
    pub fn template<S: Into<String>>(mut self, name: S) -> Self {
        self.template = name.into();
        self
    }

    /// Maximum number of files read, rendered or copied at once.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    pub fn copy_assets(mut self, copy: bool) -> Self {
        self.copy_assets = copy;
        self
    }

    /// Syntect theme for fenced code blocks, `None` to turn highlighting off.
    pub fn highlight_theme<S: Into<String>>(mut self, theme: Option<S>) -> Self {
        self.highlight_theme = theme.map(Into::into);
        self
    }

    /// Register a template filter under `name`.
    pub fn filter<F>(mut self, name: &str, filter: F) -> Self
    where
        F: tera::Filter + 'static,
    {
        self.filters.push((name.to_string(), Box::new(filter)));
        self
    }

    /// Load the feed config and default templates.
    pub fn build(self) -> Result<Site, BuildError> {
        let root = std::path::absolute(&self.root_dir)
            .map(|root| site::clean_path(&root))
            .map_err(|source| BuildError::Root {
                path: self.root_dir.clone(),
                source,
            })?;
        let feed_config_path = root.join(&self.feed_config);
        let feed = FeedConfig::read(&feed_config_path)?;
        let base_url = feed.base_url()?;

        let mut renderer = TemplateRenderer::new(&root);
        renderer.register_builtin_filters(base_url.clone());
        for (name, filter) in self.filters {
            renderer.register_filter(&name, filter);
        }

        let template = renderer.normalize(&self.template)?;
        if let Some(dir) = Path::new(&template).parent().filter(|dir| !dir.as_os_str().is_empty()) {
            renderer.load_dir(dir)?;
        }
        renderer.load([template.as_str()])?;
        renderer.add_to_context("feed", &feed);

        let feed_name = self
            .feed_config
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "feed".to_string());

        Ok(Site {
            input_dir: site::clean_path(&root.join(&self.input_dir)),
            output_dir: site::clean_path(&root.join(&self.output_dir)),
            root,
            feed,
            feed_name,
            base_url,
            template,
            renderer,
            markdown: MarkdownRenderer::new(self.highlight_theme),
            concurrency: self.concurrency,
            copy_assets: self.copy_assets,
        })
    }
}

pub struct Site {
    root: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
    feed: FeedConfig,
    feed_name: String,
    base_url: Url,
    template: String,
    renderer: TemplateRenderer,
    markdown: MarkdownRenderer,
    concurrency: usize,
    copy_assets: bool,
}

impl Site {
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run the whole pipeline: pages, feed, sitemap, then assets.
    pub async fn render_all(&mut self) -> Result<BuildReport, BuildError> {
        tracing::info!(
            input = %self.input_dir.display(),
            output = %self.output_dir.display(),
            "building site"
        );

        let files = SiteScanner::new(&self.input_dir).exclude(&self.output_dir).scan()?;
        tracing::debug!(markdown = files.markdown.len(), assets = files.assets.len(), "discovered files");

        // Every page must be parsed before anything is rendered
        let pages: Vec<Page> = stream::iter(files.markdown.iter().map(|path| self.load_page(path)))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let assets = if self.copy_assets { files.assets.as_slice() } else { &[] };
        check_collisions(&self.root, &pages, assets)?;

        self.renderer.load(pages.iter().map(|page| page.template.as_str()))?;

        self.renderer.add_to_context("pages", &sorted_summaries(&pages));

        // Rendering is sequential over one context, writes overlap
        let mut context = self.renderer.shared_context().clone();
        stream::iter(&pages)
            .map(|page| -> Result<_, BuildError> {
                let html = self.render_page(page, &mut context)?;
                Ok(write_file(self.output_dir.join(page.location.out_path()), html))
            })
            .try_buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        tracing::info!(pages = pages.len(), "pages written");

        // Feed and sitemap only once every page is on disk
        let mut feed = Feed::new(self.feed.clone());
        let skipped = feed.add_pages(&pages);
        if skipped > 0 {
            tracing::warn!(skipped, "undated pages left out of the feed");
        }
        let feed_items = feed.items().len();

        let feed_path = self.output_dir.join(format!("{}.xml", self.feed_name));
        write_file(&feed_path, feed.to_xml()?).await?;

        let sitemap_path = self.output_dir.join("sitemap.txt");
        write_file(&sitemap_path, feed.sitemap()).await?;
        tracing::info!(items = feed_items, feed = %feed_path.display(), "feed written");

        self.run_bounded(assets.iter().map(|path| self.copy_asset(path))).await?;
        if !assets.is_empty() {
            tracing::info!(assets = assets.len(), "assets copied");
        }

        Ok(BuildReport {
            pages: pages.len(),
            feed_items,
            assets: assets.len(),
            feed_path,
            sitemap_path,
        })
    }

    async fn run_bounded<I, F>(&self, tasks: I) -> Result<(), BuildError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<(), BuildError>>,
    {
        stream::iter(tasks)
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    async fn load_page(&self, path: &Path) -> Result<Page, BuildError> {
        tracing::debug!(path = %path.display(), "reading");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| BuildError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let (mut attributes, body) = frontmatter::split(&content).map_err(|source| BuildError::FrontMatter {
            path: path.to_path_buf(),
            source,
        })?;

        let template = match frontmatter::take_template(&mut attributes) {
            Some(name) => self.renderer.normalize(&name)?,
            None => self.template.clone(),
        };

        let metadata_error = |source| BuildError::Metadata {
            path: path.to_path_buf(),
            source,
        };
        let location = Location::derive(path, &self.root, &self.base_url).map_err(metadata_error)?;
        let date = attributes
            .get("date")
            .filter(|value| !value.is_null())
            .map(site::parse_date)
            .transpose()
            .map_err(metadata_error)?;

        Ok(Page {
            source: path.to_path_buf(),
            location,
            html: self.markdown.render(body),
            attributes,
            template,
            date,
        })
    }

    /// Render one page over `context`, which holds the shared values. Page
    /// keys are removed again afterwards so the next page starts clean.
    fn render_page(&self, page: &Page, context: &mut Context) -> Result<String, BuildError> {
        let attributes = || {
            page.attributes
                .iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        };

        for (key, value) in attributes() {
            context.insert(key.as_str(), value);
        }
        context.insert("html", &page.html);
        context.insert("fm", &page.attributes);
        context.insert(
            "md",
            &serde_json::json!({ "html": &page.html, "fm": &page.attributes }),
        );
        context.insert("page", &page.summary());

        let rendered = self.renderer.render(&page.template, context);

        for (key, _) in attributes() {
            context.remove(key);
        }

        tracing::debug!(source = %page.source.display(), "rendered page");
        rendered.map_err(|source| BuildError::Render {
            path: page.source.clone(),
            source,
        })
    }

    async fn copy_asset(&self, path: &Path) -> Result<(), BuildError> {
        let relative = site::relative_to_root(path, &self.root).map_err(|source| BuildError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
        let destination = self.output_dir.join(relative);

        let copy_error = |source| BuildError::Copy {
            from: path.to_path_buf(),
            to: destination.clone(),
            source,
        };
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(copy_error)?;
        }
        tokio::fs::copy(path, &destination).await.map_err(copy_error)?;

        tracing::debug!(from = %path.display(), to = %destination.display(), "copied asset");
        Ok(())
    }
}

/// Page summaries for the `pages` template variable: newest first, undated
/// pages last, ties in discovery order.
fn sorted_summaries(pages: &[Page]) -> Vec<PageSummary<'_>> {
    let mut ordered: Vec<&Page> = pages.iter().collect();
    ordered.sort_by(|a, b| match (a.date, b.date) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    ordered.into_iter().map(Page::summary).collect()
}

/// Fail when two inputs would produce the same output file.
fn check_collisions(root: &Path, pages: &[Page], assets: &[PathBuf]) -> Result<(), BuildError> {
    let mut outputs: HashMap<PathBuf, &Path> = HashMap::new();

    let page_outputs = pages
        .iter()
        .map(|page| Ok((page.location.out_path(), page.source.as_path())));
    let asset_outputs = assets.iter().map(|path| {
        site::relative_to_root(path, root)
            .map(|relative| (relative, path.as_path()))
            .map_err(|source| BuildError::Metadata {
                path: path.clone(),
                source,
            })
    });

    for entry in page_outputs.chain(asset_outputs) {
        let (output, source) = entry?;
        if let Some(first) = outputs.get(&output) {
            return Err(BuildError::Collision {
                output,
                first: first.to_path_buf(),
                second: source.to_path_buf(),
            });
        }
        outputs.insert(output, source);
    }

    Ok(())
}

async fn write_file<P: AsRef<Path>>(path: P, contents: String) -> Result<(), BuildError> {
    let path = path.as_ref();
    let write_error = |source| BuildError::Write {
        path: path.to_path_buf(),
        source,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    tokio::fs::write(path, contents).await.map_err(write_error)
}
