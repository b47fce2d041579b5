use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;
use crate::models::{Deployment, Project};

/// Per-run scratch resources: the private key file and the release archive.
/// Both are removed when the workspace is dropped, whatever path the run
/// took to get there.
pub struct DeployWorkspace {
    private_key: NamedTempFile,
    archive_name: String,
    archive_path: PathBuf,
}

pub fn release_archive_name(project_id: &str, release_id: &str) -> String {
    format!("{}_{}.tar.gz", project_id, release_id)
}

impl DeployWorkspace {
    pub fn prepare(scratch_dir: &Path, project: &Project, deployment: &Deployment) -> Result<Self> {
        fs::create_dir_all(scratch_dir)?;

        let mut private_key = tempfile::Builder::new()
            .prefix("sshkey")
            .tempfile_in(scratch_dir)?;
        private_key.write_all(project.private_key.as_bytes())?;
        if !project.private_key.ends_with('\n') {
            private_key.write_all(b"\n")?;
        }
        private_key.flush()?;

        let archive_name = release_archive_name(&project.id, &deployment.release_id);
        let archive_path = scratch_dir.join(&archive_name);

        Ok(Self {
            private_key,
            archive_name,
            archive_path,
        })
    }

    pub fn private_key(&self) -> &Path {
        self.private_key.path()
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }
}

impl Drop for DeployWorkspace {
    fn drop(&mut self) {
        if self.archive_path.exists() {
            if let Err(e) = fs::remove_file(&self.archive_path) {
                tracing::warn!(
                    "Failed to remove release archive {}: {}",
                    self.archive_path.display(),
                    e
                );
            }
        }
    }
}
