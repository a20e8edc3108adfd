use anyhow::Result;
use clap::ArgMatches;
use clap::parser::ValueSource;
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete configuration that merges CLI args, env vars, config files, and defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpwriteConfig {
    /// Build configuration
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildConfig {
    /// Directory relative paths are resolved against
    pub root: String,
    /// Directory containing markdown files
    pub input: String,
    /// Output directory for generated site
    pub output: String,
    /// Feed configuration file, also names the feed XML
    pub rss: String,
    /// Default template
    pub template: String,
    /// Max files in flight
    pub concurrency: usize,
    /// Copy non-markdown files into the output
    pub copy: bool,
    /// Syntect theme for code blocks, empty to disable highlighting
    pub highlight_theme: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            input: "posts/".to_string(),
            output: "_site/".to_string(),
            rss: "feed.json".to_string(),
            template: "templates/post.njk".to_string(),
            concurrency: upwrite_core::DEFAULT_CONCURRENCY,
            copy: true,
            highlight_theme: upwrite_core::markdown::DEFAULT_HIGHLIGHT_THEME.to_string(),
        }
    }
}

impl UpwriteConfig {
    /// Load configuration with cascading precedence:
    /// 1. CLI arguments given explicitly (highest priority)
    /// 2. Environment variables (UPWRITE_*)
    /// 3. Configuration file
    /// 4. Defaults (lowest priority)
    pub fn load(args: &ArgMatches) -> Result<Self> {
        let config_file = args
            .get_one::<String>("config")
            .cloned()
            .unwrap_or_else(|| "upwrite.toml".to_string());

        let mut builder = ConfigBuilder::builder();

        // 1. Start with defaults
        let defaults = Self::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. Add configuration file if it exists
        if Path::new(&config_file).exists() {
            builder = builder.add_source(File::from(Path::new(&config_file)));
        }

        // 3. Add environment variables with UPWRITE_ prefix
        builder = builder.add_source(
            Environment::with_prefix("UPWRITE")
                .prefix_separator("_")
                .separator("__") // Use double underscore for nested keys
                .try_parsing(true),
        );

        // 4. Override with CLI arguments (highest priority)
        for key in ["root", "input", "output", "rss", "template"] {
            if let Some(value) = explicit::<String>(args, key) {
                builder = builder.set_override(format!("build.{key}"), value.as_str())?;
            }
        }
        if let Some(limit) = explicit::<usize>(args, "concurrency") {
            builder = builder.set_override("build.concurrency", *limit as i64)?;
        }
        if explicit::<bool>(args, "no-copy").copied().unwrap_or(false) {
            builder = builder.set_override("build.copy", false)?;
        }

        // Build and deserialize
        let config = builder.build()?;
        let upwrite_config: UpwriteConfig = config.try_deserialize()?;

        Ok(upwrite_config)
    }

    /// Get the build configuration
    pub fn build_config(&self) -> &BuildConfig {
        &self.build
    }
}

/// A value the user actually typed, ignoring clap defaults so they do not
/// shadow the config file or environment.
fn explicit<'a, T: Clone + Send + Sync + 'static>(args: &'a ArgMatches, id: &str) -> Option<&'a T> {
    match args.value_source(id) {
        Some(ValueSource::CommandLine) => args.try_get_one::<T>(id).ok().flatten(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::build::make_command;

    #[test]
    fn test_default_config() {
        let config = UpwriteConfig::default();
        assert_eq!(config.build.input, "posts/");
        assert_eq!(config.build.output, "_site/");
        assert_eq!(config.build.rss, "feed.json");
        assert_eq!(config.build.template, "templates/post.njk");
        assert!(config.build.copy);
    }

    #[test]
    fn test_cli_args_override() {
        let matches = make_command()
            .try_get_matches_from(vec![
                "upwrite",
                "--input", "/custom/source",
                "-o", "/custom/output",
                "--concurrency", "4",
                "--no-copy",
            ])
            .unwrap();

        let config = UpwriteConfig::load(&matches).unwrap();
        assert_eq!(config.build.input, "/custom/source");
        assert_eq!(config.build.output, "/custom/output");
        assert_eq!(config.build.concurrency, 4);
        assert!(!config.build.copy);
        // Should still have defaults for non-overridden values
        assert_eq!(config.build.template, "templates/post.njk");
    }

    #[test]
    fn test_config_file_beats_cli_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("upwrite.toml");
        std::fs::write(&file, "[build]\noutput = \"public/\"\n").unwrap();

        let matches = make_command()
            .try_get_matches_from(vec!["upwrite", "--config", file.to_str().unwrap()])
            .unwrap();

        let config = UpwriteConfig::load(&matches).unwrap();

        assert_eq!(config.build.output, "public/");
        assert_eq!(config.build.input, "posts/");
    }
}
