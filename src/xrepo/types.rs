use serde::Serialize;

/// One imported LSIF payload for a `(repository, commit, root)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dump {
    pub id: i64,
    pub repository: String,
    pub commit: String,
    pub root: String,
    pub visible_at_tip: bool,
    pub uploaded_at: String,
}

impl Dump {
    /// True when this dump can answer queries about `path` (repo-relative).
    pub fn covers(&self, path: &str) -> bool {
        path.starts_with(&self.root)
    }

    /// Strip the dump root off a repo-relative path.
    pub fn path_in_dump<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// A versioned namespace of monikers, exported or imported by a dump.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Package {
    pub scheme: String,
    pub name: String,
    pub version: Option<String>,
}

/// The import side of a package edge: which moniker identifiers a dump
/// pulls in from the package. Feeds the reference filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReferences {
    pub package: Package,
    pub identifiers: Vec<String>,
}
