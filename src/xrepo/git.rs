//! Seam to the repository host. The production client lives with the rest
//! of the platform; this crate only depends on the trait.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

/// `(commit, parent)` edge; the parent is empty for root commits.
pub type CommitEdge = (String, String);

#[async_trait]
pub trait GitHost: Send + Sync {
    /// Tip commit of the repository's default branch.
    async fn tip(&self, repository: &str) -> Result<Option<String>>;

    /// Parentage edges reachable from `commit`, bounded by `limit` commits.
    async fn ancestry(&self, repository: &str, commit: &str, limit: usize)
        -> Result<Vec<CommitEdge>>;
}

/// Used when no repository host is wired up; queries then rely on the
/// commit data recorded at upload time.
pub struct NullGitHost;

#[async_trait]
impl GitHost for NullGitHost {
    async fn tip(&self, _repository: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn ancestry(
        &self,
        _repository: &str,
        _commit: &str,
        _limit: usize,
    ) -> Result<Vec<CommitEdge>> {
        Ok(Vec::new())
    }
}

/// In-memory host with fixed tips and parentage, for tests.
#[derive(Default)]
pub struct StaticGitHost {
    tips: HashMap<String, String>,
    edges: HashMap<String, Vec<CommitEdge>>,
}

impl StaticGitHost {
    pub fn with_tip(mut self, repository: &str, tip: &str) -> Self {
        self.tips.insert(repository.to_owned(), tip.to_owned());
        self
    }

    pub fn with_edge(mut self, repository: &str, commit: &str, parent: &str) -> Self {
        self.edges
            .entry(repository.to_owned())
            .or_default()
            .push((commit.to_owned(), parent.to_owned()));
        self
    }
}

#[async_trait]
impl GitHost for StaticGitHost {
    async fn tip(&self, repository: &str) -> Result<Option<String>> {
        Ok(self.tips.get(repository).cloned())
    }

    async fn ancestry(
        &self,
        repository: &str,
        _commit: &str,
        _limit: usize,
    ) -> Result<Vec<CommitEdge>> {
        Ok(self.edges.get(repository).cloned().unwrap_or_default())
    }
}
