use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::executor::{CommandRunner, LineControl, OutputSink, RunOutcome, SshTarget};
use crate::models::{OutputKind, OutputLine, ProjectFile, SharedFile};
use crate::scripts::shell::quote_arg;
use crate::scripts::{self, ScriptParser};

/// Copies local files onto servers with rsync over SSH.
#[derive(Clone)]
pub struct FileTransfer {
    runner: Arc<dyn CommandRunner>,
    scripts: ScriptParser,
    scratch_dir: PathBuf,
}

impl FileTransfer {
    pub fn new(runner: Arc<dyn CommandRunner>, scratch_dir: PathBuf) -> Self {
        Self {
            runner,
            scripts: ScriptParser::new(),
            scratch_dir,
        }
    }

    pub async fn send_file(
        &self,
        local: &Path,
        remote: &str,
        target: &SshTarget<'_>,
        sink: &mut dyn OutputSink,
    ) -> Result<()> {
        let mut tokens = target.tokens();
        tokens
            .insert("local_file", local.to_string_lossy())
            .insert("remote_file", remote);
        let command = self.scripts.render(scripts::SEND_FILE, &tokens)?;

        let mut sink = DirectionSwap { inner: sink };
        match self.runner.run(&command, &mut sink).await? {
            RunOutcome::Succeeded => Ok(()),
            RunOutcome::Failed { stderr, .. } => Err(AppError::Transfer(stderr)),
            RunOutcome::Interrupted => Err(AppError::Transfer("transfer interrupted".to_string())),
        }
    }

    /// Writes `content` to a scratch file, sends it, and removes the scratch
    /// file whether or not the transfer worked.
    pub async fn send_content(
        &self,
        content: &str,
        remote: &str,
        target: &SshTarget<'_>,
        sink: &mut dyn OutputSink,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("tmpfile")
            .tempfile_in(&self.scratch_dir)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;

        let result = self.send_file(file.path(), remote, target, sink).await;

        if let Err(e) = file.close() {
            tracing::warn!("Failed to remove scratch file: {}", e);
        }
        result
    }
}

/// rsync reports from the sender's point of view; the log reads better from
/// the server's.
struct DirectionSwap<'a> {
    inner: &'a mut dyn OutputSink,
}

#[async_trait]
impl OutputSink for DirectionSwap<'_> {
    async fn line(&mut self, mut line: OutputLine) -> LineControl {
        if line.kind == OutputKind::Success {
            line.text = swap_direction(&line.text);
        }
        self.inner.line(line).await
    }
}

pub fn swap_direction(text: &str) -> String {
    text.replace("received", "\u{0}")
        .replace("sent", "received")
        .replace('\u{0}', "sent")
}

/// Tightens permissions on every uploaded project file.
pub fn config_file_commands(release_path: &str, files: &[ProjectFile]) -> String {
    files
        .iter()
        .map(|file| {
            let path = format!("{}/{}", release_path, file.path.trim_start_matches('/'));
            format!("chmod 0664 {}\n", quote_arg(&path))
        })
        .collect()
}

/// Links each shared path of the release into the shared directory. The
/// shared copy is seeded from the release the first time, so existing data
/// survives every later release.
pub fn shared_file_commands(release_path: &str, shared_path: &str, files: &[SharedFile]) -> String {
    let mut commands = String::new();

    for shared in files {
        let entry = shared.file.trim();
        let is_dir = entry.ends_with('/');
        let relative = entry.trim_matches('/');
        if relative.is_empty() {
            continue;
        }

        let basename = relative.rsplit('/').next().unwrap_or(relative);
        let source = quote_arg(&format!("{}/{}", shared_path, basename));
        let target = quote_arg(&format!("{}/{}", release_path, relative));

        if is_dir {
            commands.push_str(&format!(
                "if [ ! -d {source} ]; then \
                 if [ -d {target} ]; then cp -pR {target} {source}; \
                 else mkdir -p {source}; fi; fi\n"
            ));
        } else {
            commands.push_str(&format!(
                "if [ ! -f {source} ]; then \
                 if [ -f {target} ]; then cp -p {target} {source}; else touch {source}; fi; fi\n"
            ));
        }

        commands.push_str(&format!("rm -rf {target}\n"));
        if relative.contains('/') {
            commands.push_str(&format!("mkdir -p \"$(dirname {target})\"\n"));
        }
        commands.push_str(&format!("ln -s {source} {target}\n"));
    }

    commands
}
