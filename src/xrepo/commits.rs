//! Commit-graph traversal used to pick the dump nearest to a query commit.
//! The graph is sparse: only commits observed at upload time or discovered
//! through the repository host are present.

use std::collections::{HashMap, HashSet, VecDeque};

use super::types::Dump;

/// Traversal horizon. Commits further than this from the query commit are
/// treated as having no data.
pub const MAX_COMMIT_DISTANCE: usize = 100;

#[derive(Debug, Default)]
pub struct CommitGraph {
    parents: HashMap<String, Vec<String>>,
    children: HashMap<String, Vec<String>>,
}

impl CommitGraph {
    /// Build from `(commit, parent)` edges; an empty parent marks a root
    /// commit (the commit is known but contributes no edge).
    pub fn new(edges: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut graph = CommitGraph::default();
        for (commit, parent) in edges {
            if parent.is_empty() {
                graph.parents.entry(commit).or_default();
                continue;
            }
            graph
                .parents
                .entry(commit.clone())
                .or_default()
                .push(parent.clone());
            graph.children.entry(parent).or_default().push(commit);
        }
        graph
    }

    /// Distance from `from` to every commit reachable within the horizon,
    /// walking both parent and child edges.
    pub fn distances(&self, from: &str) -> HashMap<String, usize> {
        self.bfs(from, |commit| {
            self.parents
                .get(commit)
                .into_iter()
                .flatten()
                .chain(self.children.get(commit).into_iter().flatten())
        })
    }

    /// Distance from `from` to its ancestors only.
    pub fn ancestor_distances(&self, from: &str) -> HashMap<String, usize> {
        self.bfs(from, |commit| {
            self.parents.get(commit).into_iter().flatten()
        })
    }

    fn bfs<'a, N, I>(&'a self, from: &str, neighbors: N) -> HashMap<String, usize>
    where
        N: Fn(&str) -> I,
        I: Iterator<Item = &'a String>,
    {
        let mut distances = HashMap::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        distances.insert(from.to_owned(), 0);
        seen.insert(from.to_owned());
        queue.push_back((from.to_owned(), 0usize));

        while let Some((commit, distance)) = queue.pop_front() {
            if distance >= MAX_COMMIT_DISTANCE {
                continue;
            }
            for next in neighbors(&commit) {
                if seen.insert(next.clone()) {
                    distances.insert(next.clone(), distance + 1);
                    queue.push_back((next.clone(), distance + 1));
                }
            }
        }

        distances
    }
}

/// Choose the dump to answer a query at `(commit, path)`. Nearest commit
/// wins; at equal distance ancestors beat descendants, then the longest
/// matching root, then the lowest dump id for stability.
pub fn closest_dump<'a>(
    graph: &CommitGraph,
    commit: &str,
    path: &str,
    dumps: &'a [Dump],
) -> Option<&'a Dump> {
    let distances = graph.distances(commit);
    let ancestor_distances = graph.ancestor_distances(commit);

    dumps
        .iter()
        .filter(|dump| dump.covers(path))
        .filter_map(|dump| {
            let distance = *distances.get(&dump.commit)?;
            let is_ancestor = ancestor_distances
                .get(&dump.commit)
                .map(|d| *d == distance)
                .unwrap_or(false);
            Some((distance, !is_ancestor, std::cmp::Reverse(dump.root.len()), dump.id, dump))
        })
        .min_by_key(|(distance, not_ancestor, root_len, id, _)| {
            (*distance, *not_ancestor, *root_len, *id)
        })
        .map(|(_, _, _, _, dump)| dump)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(id: i64, commit: &str, root: &str) -> Dump {
        Dump {
            id,
            repository: "r".into(),
            commit: commit.into(),
            root: root.into(),
            visible_at_tip: false,
            uploaded_at: String::new(),
        }
    }

    fn linear_graph() -> CommitGraph {
        // c1 <- c2 <- c3
        CommitGraph::new([
            ("c2".to_owned(), "c1".to_owned()),
            ("c3".to_owned(), "c2".to_owned()),
        ])
    }

    #[test]
    fn prefers_nearest_commit_with_data() {
        let graph = linear_graph();
        let dumps = vec![dump(1, "c1", ""), dump(2, "c3", "")];

        // c2 is one step from both; the ancestor c1 wins the tie.
        let chosen = closest_dump(&graph, "c2", "src/a.ts", &dumps).unwrap();
        assert_eq!(chosen.id, 1);
    }

    #[test]
    fn exact_commit_beats_neighbors() {
        let graph = linear_graph();
        let dumps = vec![dump(1, "c1", ""), dump(2, "c2", ""), dump(3, "c3", "")];
        assert_eq!(closest_dump(&graph, "c2", "x", &dumps).unwrap().id, 2);
    }

    #[test]
    fn root_must_cover_the_path() {
        let graph = linear_graph();
        let dumps = vec![dump(1, "c2", "backend/"), dump(2, "c1", "frontend/")];

        let chosen = closest_dump(&graph, "c2", "frontend/app.ts", &dumps).unwrap();
        assert_eq!(chosen.id, 2);
        assert!(closest_dump(&graph, "c2", "docs/readme.md", &dumps).is_none());
    }

    #[test]
    fn longest_root_wins_at_equal_distance() {
        let graph = linear_graph();
        let dumps = vec![dump(1, "c2", ""), dump(2, "c2", "src/")];
        let chosen = closest_dump(&graph, "c2", "src/a.ts", &dumps).unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[test]
    fn unreachable_commits_are_ignored() {
        let graph = linear_graph();
        let dumps = vec![dump(1, "orphan", "")];
        assert!(closest_dump(&graph, "c2", "x", &dumps).is_none());
    }
}
