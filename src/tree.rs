//! The root directory: maps dotted metric names to filesystem paths,
//! discovers nodes by walk or glob, and memoises a name -> node cache.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{CeresError, Result};
use crate::node::Node;
use crate::path_util;
use crate::series::TimeSeriesData;

const TREE_MARKER: &str = ".ceres-tree";

/// A directory tree rooted at `root`, holding a hierarchy of metric nodes.
pub struct Tree {
    root: PathBuf,
    nodes: HashMap<String, Node>,
}

impl Tree {
    /// Open an existing tree without touching the filesystem.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            nodes: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `true` iff `path` carries the tree marker directory.
    pub fn is_tree_dir(path: &Path) -> bool {
        path.join(TREE_MARKER).is_dir()
    }

    /// Materialise the tree-marker subdirectory, writing each property to
    /// its own file inside it.
    pub fn create(root: &Path, properties: HashMap<String, String>) -> Result<Tree> {
        std::fs::create_dir_all(root)?;
        let marker = root.join(TREE_MARKER);
        std::fs::create_dir_all(&marker)?;
        for (key, value) in &properties {
            std::fs::write(marker.join(key), value)?;
        }
        info!(root = %root.display(), "created tree");
        Ok(Tree::open(root.to_path_buf()))
    }

    /// `a.b.c` -> `<root>/a/b/c`.
    pub fn filesystem_path(&self, node_path: &str) -> PathBuf {
        path_util::filesystem_path(&self.root, node_path)
    }

    /// `<root>/a/b/c` -> `a.b.c`, or `None` if `fs_path` isn't under `root`.
    pub fn node_path(&self, fs_path: &Path) -> Option<String> {
        path_util::node_path(&self.root, fs_path)
    }

    /// Create a node directory and its initial metadata, caching the result.
    pub fn create_node(&mut self, node_path: &str, properties: HashMap<String, String>) -> Result<()> {
        let node = Node::create(&self.root, node_path, properties)?;
        self.nodes.insert(node_path.to_string(), node);
        Ok(())
    }

    /// Memoised lookup; fails with `NodeNotFound` if `node_path` isn't a
    /// node directory.
    pub fn get_node(&mut self, node_path: &str) -> Result<&mut Node> {
        match self.nodes.entry(node_path.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let fs_path = path_util::filesystem_path(&self.root, node_path);
                if !Node::is_node_dir(&fs_path) {
                    return Err(CeresError::NodeNotFound(node_path.to_string()));
                }
                Ok(e.insert(Node::existing(node_path.to_string(), fs_path)))
            }
        }
    }

    /// Drop a cached node so the next lookup re-derives it from disk.
    pub fn forget_node(&mut self, node_path: &str) {
        self.nodes.remove(node_path);
    }

    pub fn store(&mut self, node_path: &str, datapoints: &[(i64, Option<f64>)]) -> Result<()> {
        self.get_node(node_path)?.write(datapoints)
    }

    pub fn fetch(&mut self, node_path: &str, from: i64, until: i64) -> Result<TimeSeriesData> {
        self.get_node(node_path)?.read(from, until)
    }

    /// Full filesystem traversal of `root`, yielding every node's dotted name.
    pub fn walk(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();
        self.walk_dir(&self.root, &mut found)?;
        found.sort();
        Ok(found)
    }

    fn walk_dir(&self, dir: &Path, found: &mut Vec<String>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if path.file_name().map(|n| n == TREE_MARKER).unwrap_or(false) {
                continue;
            }
            if Node::is_node_dir(&path) {
                if let Some(node_path) = self.node_path(&path) {
                    found.push(node_path);
                }
            } else {
                self.walk_dir(&path, found)?;
            }
        }
        Ok(())
    }

    /// Translate a dotted glob pattern (e.g. `servers.*.cpu`) to a
    /// filesystem glob and yield the dotted names of every matching node,
    /// optionally filtered to those with data in `[from, until)`.
    pub fn find(
        &mut self,
        pattern: &str,
        from: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<String>> {
        let fs_pattern = self.filesystem_path(pattern);
        let pattern_str = fs_pattern.to_string_lossy().into_owned();

        let paths = glob::glob(&pattern_str).map_err(|e| {
            CeresError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
        })?;

        let mut found = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| CeresError::Io(e.into_error()))?;
            if !Node::is_node_dir(&path) {
                continue;
            }
            let Some(node_path) = self.node_path(&path) else {
                continue;
            };

            if from.is_some() || until.is_some() {
                if !self.get_node(&node_path)?.has_data_for_interval(from, until)? {
                    continue;
                }
            }
            found.push(node_path);
        }
        found.sort();
        Ok(found)
    }
}
