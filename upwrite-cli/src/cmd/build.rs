use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use upwrite_core::SiteBuilder;
use crate::config::UpwriteConfig;

pub fn add_build_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("DIR")
                .help("Path to markdown files")
                .default_value("posts/")
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Directory for the output")
                .default_value("_site/")
        )
        .arg(
            Arg::new("rss")
                .short('r')
                .long("rss")
                .value_name("FILE")
                .help("Path to the feed configuration (JSON, YAML or TOML), also names the .xml output")
                .default_value("feed.json")
        )
        .arg(
            Arg::new("template")
                .short('t')
                .long("template")
                .value_name("FILE")
                .help("Path of the template to use, can be overridden with front-matter")
                .default_value("templates/post.njk")
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .default_value("upwrite.toml")
        )
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .help("Directory every other path is relative to")
                .default_value(".")
        )
        .arg(
            Arg::new("concurrency")
                .short('j')
                .long("concurrency")
                .value_name("N")
                .help("Maximum number of files processed at once")
                .value_parser(value_parser!(usize))
        )
        .arg(
            Arg::new("no-copy")
                .long("no-copy")
                .help("Do not copy non-markdown files to the output")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .help("Log build progress")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .help("Print version")
                .action(ArgAction::Version)
        )
}

pub fn make_command() -> Command {
    add_build_args(
        Command::new("upwrite")
            .version(env!("CARGO_PKG_VERSION"))
            .disable_version_flag(true)
    )
    .about("Render markdown posts into HTML pages, a feed and a sitemap")
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    // Load cascading configuration
    let upwrite_config = UpwriteConfig::load(args)?;
    let build_config = upwrite_config.build_config();
    tracing::debug!(?build_config, "configuration loaded");

    let highlight_theme = Some(build_config.highlight_theme.clone()).filter(|theme| !theme.is_empty());

    let mut site = SiteBuilder::new()
        .root_dir(&build_config.root)
        .input_dir(&build_config.input)
        .output_dir(&build_config.output)
        .feed_config(&build_config.rss)
        .template(build_config.template.as_str())
        .concurrency(build_config.concurrency)
        .copy_assets(build_config.copy)
        .highlight_theme(highlight_theme)
        .build()
        .context("failed to set up the build")?;

    let report = site.render_all().await.context("build failed")?;

    tracing::info!(
        pages = report.pages,
        feed_items = report.feed_items,
        assets = report.assets,
        feed = %report.feed_path.display(),
        "site built in {}",
        site.output_dir().display()
    );
    println!("upwritten");

    Ok(())
}
