use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::infrastructure::engine::Container;

/// Root directory under which every job gets its own working area.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        info!("✅ Working directory ready at {:?}", self.root);
        Ok(())
    }

    /// Creates `<root>/<job id>`. Fails if the directory already exists, so
    /// no two jobs can end up sharing one.
    pub async fn allocate(&self, job_id: Uuid) -> io::Result<WorkArea> {
        let dir = self.root.join(job_id.to_string());
        fs::create_dir(&dir).await?;
        Ok(WorkArea { dir })
    }
}

/// One job's exclusive directory.
#[derive(Clone, Debug)]
pub struct WorkArea {
    dir: PathBuf,
}

impl WorkArea {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self, source: &Url) -> PathBuf {
        self.dir.join(format!("source.{}", source_extension(source)))
    }

    pub fn output_path(&self, container: Container) -> PathBuf {
        self.dir.join(format!("output.{}", container.extension()))
    }
}

/// Extension of the URL's last path segment, or `bin` when it has none
/// worth trusting.
pub fn source_extension(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}
