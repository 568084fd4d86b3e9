//! Bounded discovery of live control groups in a cgroup v2 hierarchy.
//!
//! The walk is an explicit-stack depth-first traversal with
//! lexicographically sorted directory entries, so its output order is
//! reproducible for a given tree. It is lazy: nodes are yielded one at a
//! time and no more than `max_nodes` directories are ever materialized,
//! keeping worst-case memory bounded by the cap rather than the hierarchy
//! size.
//!
//! A directory counts as a control group iff it carries a
//! `cgroup.controllers` file; anything else is descended into but not
//! reported. Per-entry I/O errors (permission denied, race-deleted
//! directories) are logged and skipped so a single unreadable group cannot
//! blind the exporter to the rest of the tree. Only the root itself failing
//! is fatal.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

/// Marker file whose presence classifies a directory as a control group.
pub const CONTROLLERS_FILE: &str = "cgroup.controllers";

/// Reserved label for the hierarchy root itself.
pub const ROOT_NAME: &str = "root";

/// A control group discovered by one walk.
///
/// Nodes are created fresh on every walk and discarded with the collection
/// pass that produced them; there is no cross-pass identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupNode {
    /// Absolute filesystem location; unique within one walk result.
    pub path: PathBuf,
    /// Label-safe name: the root-relative path with `/` mapped to `.`, or
    /// [`ROOT_NAME`] for the root itself.
    pub name: String,
    /// Resource controllers active for this group.
    pub controllers: Vec<String>,
    /// When this walk saw the group.
    pub discovered_at: SystemTime,
}

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("cgroup hierarchy root `{path}` is not accessible: {source}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cgroup hierarchy root `{path}` is not a directory")]
    RootNotADirectory { path: PathBuf },

    #[error("group at `{path}` maps to label `{name}`, which is already taken")]
    AmbiguousName { name: String, path: PathBuf },

    #[error("walk deadline exceeded at `{path}`")]
    DeadlineExceeded { path: PathBuf },
}

/// Discovers control groups beneath a hierarchy root, bounded by a node cap
/// and a depth cap.
#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
    max_nodes: usize,
    max_depth: usize,
}

impl Walker {
    pub fn new(root: impl Into<PathBuf>, max_nodes: usize, max_depth: usize) -> Self {
        Self {
            root: root.into(),
            max_nodes,
            max_depth,
        }
    }

    /// Starts a walk, optionally bounded by a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`WalkError::RootUnavailable`] or
    /// [`WalkError::RootNotADirectory`] when the root itself cannot be read;
    /// everything below the root is handled per entry by the iterator.
    pub fn walk(&self, deadline: Option<Instant>) -> Result<Walk, WalkError> {
        let metadata =
            std::fs::metadata(&self.root).map_err(|source| WalkError::RootUnavailable {
                path: self.root.clone(),
                source,
            })?;
        if !metadata.is_dir() {
            return Err(WalkError::RootNotADirectory {
                path: self.root.clone(),
            });
        }

        Ok(Walk {
            root: self.root.clone(),
            stack: vec![(self.root.clone(), 0)],
            seen_names: HashSet::new(),
            discovered: 0,
            max_nodes: self.max_nodes,
            max_depth: self.max_depth,
            deadline,
            done: false,
        })
    }

    /// Runs a walk to completion, returning the nodes gathered and the error
    /// that cut the walk short, if any.
    pub fn collect_nodes(&self, deadline: Option<Instant>) -> (Vec<CgroupNode>, Option<WalkError>) {
        let walk = match self.walk(deadline) {
            Ok(walk) => walk,
            Err(err) => return (Vec::new(), Some(err)),
        };

        let mut nodes = Vec::new();
        let mut error = None;
        for item in walk {
            match item {
                Ok(node) => nodes.push(node),
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        (nodes, error)
    }
}

/// A lazy, bounded depth-first traversal over the hierarchy.
///
/// Yields `Ok(CgroupNode)` per discovered group in deterministic preorder.
/// An `Err` item (name collision, deadline) terminates the iteration; the
/// nodes yielded before it remain valid partial output. Reaching the node
/// cap prunes all remaining subtrees.
#[derive(Debug)]
pub struct Walk {
    root: PathBuf,
    stack: Vec<(PathBuf, usize)>,
    seen_names: HashSet<String>,
    discovered: usize,
    max_nodes: usize,
    max_depth: usize,
    deadline: Option<Instant>,
    done: bool,
}

impl Walk {
    fn derive_name(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ROOT_NAME.to_string(),
            Ok(rel) => rel.to_string_lossy().replace('/', "."),
            // Every stacked path is below the root by construction.
            Err(_) => ROOT_NAME.to_string(),
        }
    }

    fn push_children(&mut self, path: &Path, depth: usize) {
        if depth >= self.max_depth {
            return;
        }

        let entries = match std::fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("skipping unreadable directory `{}`: {err}", path.display());
                return;
            }
        };

        let mut children: Vec<PathBuf> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let file_type = entry.file_type().ok()?;
                file_type.is_dir().then(|| entry.path())
            })
            .collect();
        children.sort();

        // LIFO stack: reversed push makes the smallest entry pop first.
        for child in children.into_iter().rev() {
            self.stack.push((child, depth + 1));
        }
    }

    fn read_controllers(path: &Path) -> io::Result<Vec<String>> {
        let contents = std::fs::read_to_string(path.join(CONTROLLERS_FILE))?;
        Ok(contents.split_whitespace().map(str::to_string).collect())
    }
}

impl Iterator for Walk {
    type Item = Result<CgroupNode, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.discovered >= self.max_nodes {
            return None;
        }

        while let Some((path, depth)) = self.stack.pop() {
            if let Some(deadline) = self.deadline
                && Instant::now() >= deadline
            {
                self.done = true;
                return Some(Err(WalkError::DeadlineExceeded { path }));
            }

            self.push_children(&path, depth);

            let controllers = match Self::read_controllers(&path) {
                Ok(controllers) => controllers,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    // Not a control group; keep descending.
                    continue;
                }
                Err(err) => {
                    log::warn!(
                        "skipping group with unreadable controller list `{}`: {err}",
                        path.display()
                    );
                    continue;
                }
            };

            let name = self.derive_name(&path);
            if !self.seen_names.insert(name.clone()) {
                self.done = true;
                return Some(Err(WalkError::AmbiguousName { name, path }));
            }

            self.discovered += 1;
            if self.discovered >= self.max_nodes {
                // Cap reached: prune everything still on the stack.
                self.done = true;
            }

            return Some(Ok(CgroupNode {
                path,
                name,
                controllers,
                discovered_at: SystemTime::now(),
            }));
        }

        self.done = true;
        None
    }
}
