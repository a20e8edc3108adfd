pub mod builder;
pub mod config;
pub mod feed;
pub mod frontmatter;
pub mod markdown;
pub mod scanner;
pub mod site;
pub mod template;

// Re-export main types
pub use builder::{BuildError, BuildReport, DEFAULT_CONCURRENCY, Site, SiteBuilder};
pub use config::{FeedConfig, FeedFormat};
pub use feed::{Feed, FeedItem};
pub use site::{Location, Page};
pub use template::{TemplateError, TemplateRenderer};
