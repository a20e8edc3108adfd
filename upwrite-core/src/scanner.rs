use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("input directory {} does not exist", .0.display())]
    MissingInput(PathBuf),
    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

/// Files found under the input directory, in file-name order.
#[derive(Debug, Default)]
pub struct ScannedFiles {
    pub markdown: Vec<PathBuf>,
    pub assets: Vec<PathBuf>,
}

pub struct SiteScanner {
    input_dir: PathBuf,
    excluded: Vec<PathBuf>,
}

impl SiteScanner {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            input_dir: path.as_ref().to_path_buf(),
            excluded: Vec::new(),
        }
    }

    /// Skip `path` and everything below it, e.g. an output directory that
    /// lives inside the input.
    pub fn exclude<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.excluded.push(path.as_ref().to_path_buf());
        self
    }

    /// Walk the input directory and partition files into Markdown and
    /// everything else.
    pub fn scan(&self) -> Result<ScannedFiles, ScanError> {
        if !self.input_dir.is_dir() {
            return Err(ScanError::MissingInput(self.input_dir.clone()));
        }

        tracing::debug!(input = %self.input_dir.display(), "scanning");

        let mut files = ScannedFiles::default();
        let walker = WalkDir::new(&self.input_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.excluded.iter().any(|excluded| entry.path() == excluded));

        for entry in walker {
            let entry = entry.map_err(|source| ScanError::Walk {
                path: self.input_dir.clone(),
                source,
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.into_path();
            if is_markdown(&path) {
                files.markdown.push(path);
            } else {
                files.assets.push(path);
            }
        }

        Ok(files)
    }
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}
