use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tera::{Context, Tera};
use url::Url;
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template error: {0}")]
    Tera(#[from] tera::Error),
    #[error("template {} not found", .0.display())]
    Missing(PathBuf),
    #[error("template {} is not inside the root directory", .0.display())]
    OutsideRoot(PathBuf),
    #[error("failed to walk template directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// A template filter registered by the host application.
pub type BoxedFilter = Box<dyn tera::Filter>;

struct HostFilter(BoxedFilter);

impl tera::Filter for HostFilter {
    fn filter(&self, value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        self.0.filter(value, args)
    }

    fn is_safe(&self) -> bool {
        self.0.is_safe()
    }
}

/// Loads templates by their root-relative path and renders them.
///
/// Templates are addressed the way they sit on disk relative to the root
/// (`templates/post.njk`), so `{% include %}` and `{% extends %}` take the
/// same paths.
pub struct TemplateRenderer {
    tera: Tera,
    root: PathBuf,
    context: Context,
}

impl TemplateRenderer {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let mut tera = Tera::default();
        // Page bodies arrive as HTML already
        tera.autoescape_on(vec![]);

        Self {
            tera,
            root: crate::site::clean_path(root.as_ref()),
            context: Context::new(),
        }
    }

    /// Register every file under `dir`.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<(), TemplateError> {
        let dir = self.root.join(dir);
        if !dir.is_dir() {
            return Ok(());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() {
                let name = self.template_name(entry.path())?;
                files.push((entry.into_path(), Some(name)));
            }
        }

        self.tera.add_template_files(files)?;
        Ok(())
    }

    /// Register the named templates, failing on the first one that does not
    /// exist. Names already loaded are skipped.
    ///
    /// Files next to a template that share its extension are registered with
    /// it, so partials it includes or extends from its own directory resolve.
    pub fn load<'a, I>(&mut self, names: I) -> Result<(), TemplateError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen: BTreeSet<String> = self.tera.get_template_names().map(String::from).collect();
        let mut files = Vec::new();

        for name in names {
            let name = self.normalize(name)?;
            if seen.contains(&name) {
                continue;
            }

            let path = self.root.join(&name);
            if !path.is_file() {
                return Err(TemplateError::Missing(path));
            }

            for (sibling_path, sibling) in self.siblings(&path)? {
                if seen.insert(sibling.clone()) {
                    files.push((sibling_path, Some(sibling)));
                }
            }
            if seen.insert(name.clone()) {
                files.push((path, Some(name)));
            }
        }

        self.tera.add_template_files(files)?;
        Ok(())
    }

    pub fn register_filter(&mut self, name: &str, filter: BoxedFilter) {
        self.tera.register_filter(name, HostFilter(filter));
    }

    /// Register the built-in filters.
    ///
    /// `absolute_url` resolves a path against the feed's base link:
    /// `{{ "feed.xml" | absolute_url }}`.
    pub fn register_builtin_filters(&mut self, base: Url) {
        self.tera.register_filter(
            "absolute_url",
            move |value: &Value, _: &HashMap<String, Value>| -> tera::Result<Value> {
                let path = tera::try_get_value!("absolute_url", "value", String, value);
                base.join(&path)
                    .map(|url| Value::String(url.to_string()))
                    .map_err(|e| tera::Error::msg(format!("absolute_url: cannot resolve {path:?}: {e}")))
            },
        );
    }

    /// Add a value to the context shared by every render.
    pub fn add_to_context<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        self.context.insert(key, value);
    }

    /// Values every page sees. Callers start their render context from this.
    pub fn shared_context(&self) -> &Context {
        &self.context
    }

    /// Render `name` with `context` as given.
    pub fn render(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        Ok(self.tera.render(&self.normalize(name)?, context)?)
    }

    /// Canonical template name: root-relative, `/`-separated.
    pub fn normalize(&self, name: &str) -> Result<String, TemplateError> {
        let path = Path::new(name);
        if path.is_absolute() {
            return self.template_name(path);
        }

        let mut parts: Vec<String> = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(TemplateError::OutsideRoot(path.to_path_buf()));
                    }
                }
                _ => return Err(TemplateError::OutsideRoot(path.to_path_buf())),
            }
        }

        Ok(parts.join("/"))
    }

    fn template_name(&self, path: &Path) -> Result<String, TemplateError> {
        let cleaned = crate::site::clean_path(path);
        let relative = cleaned
            .strip_prefix(&self.root)
            .map_err(|_| TemplateError::OutsideRoot(path.to_path_buf()))?;
        self.normalize(&relative.to_string_lossy())
    }

    /// Files under `path`'s directory with the same extension. Templates at
    /// the root itself get none, the root holds the whole site.
    fn siblings(&self, path: &Path) -> Result<Vec<(PathBuf, String)>, TemplateError> {
        let Some(dir) = path.parent().filter(|dir| *dir != self.root.as_path()) else {
            return Ok(Vec::new());
        };

        let extension = path.extension();
        let mut found = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && entry.path().extension() == extension {
                let name = self.template_name(entry.path())?;
                found.push((entry.into_path(), name));
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn renderer_with(files: &[(&str, &str)]) -> (tempfile::TempDir, TemplateRenderer) {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let renderer = TemplateRenderer::new(dir.path());
        (dir, renderer)
    }

    #[test]
    fn test_render_loaded_dir_with_include() {
        let (_dir, mut renderer) = renderer_with(&[
            ("templates/post.njk", "{% include \"templates/partials/head.njk\" %}<h1>{{ title }}</h1>{{ html }}"),
            ("templates/partials/head.njk", "<head></head>"),
        ]);
        renderer.load_dir("templates").unwrap();

        let mut context = Context::new();
        context.insert("title", "Hello");
        context.insert("html", "<p>Body</p>");

        let html = renderer.render("templates/post.njk", &context).unwrap();
        assert_eq!(html, "<head></head><h1>Hello</h1><p>Body</p>");
    }

    #[test]
    fn test_load_named_and_missing() {
        let (_dir, mut renderer) = renderer_with(&[("layouts/index.njk", "{{ feed.title }}")]);
        renderer.load(["./layouts/index.njk"]).unwrap();
        renderer.add_to_context("feed", &serde_json::json!({ "title": "Blog" }));

        let html = renderer.render("layouts/index.njk", renderer.shared_context()).unwrap();
        assert_eq!(html, "Blog");

        let err = renderer.load(["layouts/nope.njk"]).unwrap_err();
        assert!(matches!(err, TemplateError::Missing(_)));
    }

    #[test]
    fn test_load_registers_sibling_partials() {
        let (_dir, mut renderer) = renderer_with(&[
            ("layouts/index.njk", "{% include \"layouts/nav.njk\" %}{{ html }}"),
            ("layouts/nav.njk", "<nav></nav>"),
            ("layouts/notes.txt", "{{ not a template"),
        ]);
        renderer.load(["layouts/index.njk"]).unwrap();

        let mut context = Context::new();
        context.insert("html", "<p>x</p>");
        assert_eq!(renderer.render("layouts/index.njk", &context).unwrap(), "<nav></nav><p>x</p>");
        assert!(renderer.render("layouts/notes.txt", &context).is_err());
    }

    #[test]
    fn test_absolute_name_with_parent_dirs() {
        let (dir, mut renderer) = renderer_with(&[("layouts/page.njk", "ok")]);
        let name = dir.path().join("other/../layouts/page.njk");
        renderer.load([name.to_str().unwrap()]).unwrap();
        assert_eq!(renderer.render("layouts/page.njk", &Context::new()).unwrap(), "ok");
    }

    #[test]
    fn test_normalize() {
        let (_dir, renderer) = renderer_with(&[]);
        assert_eq!(renderer.normalize("./templates/../templates/post.njk").unwrap(), "templates/post.njk");
        assert!(matches!(renderer.normalize("../secret.njk"), Err(TemplateError::OutsideRoot(_))));
    }

    #[test]
    fn test_absolute_url_filter() {
        let (_dir, mut renderer) = renderer_with(&[("t.njk", "{{ \"feed.xml\" | absolute_url }}")]);
        renderer.register_builtin_filters(Url::parse("https://example.com/blog/").unwrap());
        renderer.load(["t.njk"]).unwrap();

        let html = renderer.render("t.njk", &Context::new()).unwrap();
        assert_eq!(html, "https://example.com/blog/feed.xml");
    }

    #[test]
    fn test_host_filter() {
        let (_dir, mut renderer) = renderer_with(&[("t.njk", "{{ \"hi\" | shout }}")]);
        renderer.register_filter(
            "shout",
            Box::new(|value: &Value, _: &HashMap<String, Value>| -> tera::Result<Value> {
                Ok(Value::String(value.as_str().unwrap_or_default().to_uppercase()))
            }),
        );
        renderer.load(["t.njk"]).unwrap();

        assert_eq!(renderer.render("t.njk", &Context::new()).unwrap(), "HI");
    }

    #[test]
    fn test_html_is_not_escaped() {
        let (_dir, mut renderer) = renderer_with(&[("page.html", "{{ html }}")]);
        renderer.load(["page.html"]).unwrap();

        let mut context = Context::new();
        context.insert("html", "<p>x</p>");
        assert_eq!(renderer.render("page.html", &context).unwrap(), "<p>x</p>");
    }
}
