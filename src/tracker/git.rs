use git2::{IndexAddOption, Repository, Signature};
use std::path::{Path, PathBuf};
use tracing::info;

use super::Committer;
use crate::errors::ExternalError;

/// Commits the whole working tree with git2.
///
/// The repository is opened per commit so the committer holds no
/// non-`Sync` handle between calls.
pub struct GitCommitter {
    project_dir: PathBuf,
    author_name: String,
    author_email: String,
}

impl GitCommitter {
    pub fn new(project_dir: &Path, author_name: &str, author_email: &str) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        let commit = &config.toml().commit;
        Self::new(&config.project_dir, &commit.author_name, &commit.author_email)
    }

    fn head_commit(repo: &Repository) -> Option<git2::Commit<'_>> {
        repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }
}

impl Committer for GitCommitter {
    fn commit(&self, message: &str) -> Result<Option<String>, ExternalError> {
        let repo = Repository::open(&self.project_dir)?;

        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        // Deletions are not picked up by add_all.
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Signature::now(&self.author_name, &self.author_email)?;

        // Unborn branch: first commit has no parent.
        let commit_id = match Self::head_commit(&repo) {
            Some(parent) => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?,
            None => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?,
        };

        let short: String = commit_id.to_string().chars().take(7).collect();
        info!(commit = %short, message, "committed");
        Ok(Some(short))
    }
}
