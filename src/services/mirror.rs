use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::executor::{CollectingSink, CommandRunner, RunOutcome};
use crate::models::Project;
use crate::scripts::{self, ScriptParser, ScriptTokens};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetails {
    pub sha: String,
    pub committer: String,
    pub email: String,
}

/// Local bare mirrors of project repositories.
#[derive(Clone)]
pub struct GitMirror {
    runner: Arc<dyn CommandRunner>,
    scripts: ScriptParser,
    mirrors_dir: PathBuf,
}

impl GitMirror {
    pub fn new(runner: Arc<dyn CommandRunner>, mirrors_dir: PathBuf) -> Self {
        Self {
            runner,
            scripts: ScriptParser::new(),
            mirrors_dir,
        }
    }

    pub fn mirror_path(&self, project_id: &str) -> PathBuf {
        self.mirrors_dir.join(format!("{}.git", project_id))
    }

    /// Clones the mirror on first use, then fetches everything.
    pub async fn refresh(&self, project: &Project, private_key: &Path) -> Result<()> {
        std::fs::create_dir_all(&self.mirrors_dir)?;

        let mut tokens = ScriptTokens::new();
        tokens
            .insert("mirror_path", self.mirror_path(&project.id).to_string_lossy())
            .insert("repository", &project.repository)
            .insert("private_key", private_key.to_string_lossy());

        let (outcome, sink) = self.run_local(scripts::UPDATE_MIRROR, &tokens).await?;
        match outcome {
            RunOutcome::Succeeded => Ok(()),
            _ => Err(AppError::MirrorRefresh(sink.stderr())),
        }
    }

    pub async fn commit_details(&self, project_id: &str, reference: &str) -> Result<CommitDetails> {
        let mut tokens = ScriptTokens::new();
        tokens
            .insert("mirror_path", self.mirror_path(project_id).to_string_lossy())
            .insert("git_reference", reference);

        let (outcome, sink) = self.run_local(scripts::FETCH_COMMIT_DETAILS, &tokens).await?;
        if !outcome.is_success() {
            return Err(AppError::MetadataFetch(sink.stderr()));
        }

        parse_commit_details(&sink.stdout()).ok_or_else(|| {
            AppError::MetadataFetch(format!("Unexpected commit details: {}", sink.stdout()))
        })
    }

    pub async fn create_archive(&self, project_id: &str, sha: &str, archive: &Path) -> Result<()> {
        let mut tokens = ScriptTokens::new();
        tokens
            .insert("mirror_path", self.mirror_path(project_id).to_string_lossy())
            .insert("sha", sha)
            .insert("release_archive", archive.to_string_lossy());

        let (outcome, sink) = self.run_local(scripts::CREATE_ARCHIVE, &tokens).await?;
        match outcome {
            RunOutcome::Succeeded => Ok(()),
            _ => Err(AppError::ArchiveBuild(sink.stderr())),
        }
    }

    async fn run_local(
        &self,
        template: &str,
        tokens: &ScriptTokens,
    ) -> Result<(RunOutcome, CollectingSink)> {
        let script = format!("set -e\n{}", self.scripts.render(template, tokens)?);
        let mut sink = CollectingSink::new();
        let outcome = self.runner.run(&script, &mut sink).await?;
        Ok((outcome, sink))
    }
}

/// Parses `sha<TAB>committer<TAB>email`.
pub fn parse_commit_details(output: &str) -> Option<CommitDetails> {
    let mut fields = output.trim().splitn(3, '\t');
    let sha = fields.next()?.trim();
    let committer = fields.next()?.trim();
    let email = fields.next()?.trim();

    if sha.is_empty() {
        return None;
    }

    Some(CommitDetails {
        sha: sha.to_string(),
        committer: committer.to_string(),
        email: email.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tab_separated_details() {
        let details = parse_commit_details("abc123\tAda Lovelace \t ada@example.com\n").unwrap();
        assert_eq!(
            details,
            CommitDetails {
                sha: "abc123".to_string(),
                committer: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
            }
        );
    }

    #[test]
    fn rejects_incomplete_details() {
        assert!(parse_commit_details("").is_none());
        assert!(parse_commit_details("abc123\tAda").is_none());
        assert!(parse_commit_details("fatal: bad revision 'nope'").is_none());
    }
}
