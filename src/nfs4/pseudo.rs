//! The server pseudo filesystem.
//!
//! A virtual namespace rooted at "/" exposes each exported share as a
//! child node. The tree is rebuilt from the share registry whenever the
//! export list changes; a LOOKUP into an export child is a junction and
//! crosses into the real share's filesystem by swapping in its root
//! handle.

use crate::handle::FileHandle;
use crate::share::ShareRegistry;

/// Node of the pseudo tree.
#[derive(Debug, Clone)]
pub struct PseudoNode {
    pub name: String,
    /// Absolute pseudo path ("/", "/export").
    pub path: String,
    pub handle: FileHandle,
    /// Stable file id inside the pseudo FSID.
    pub fileid: u64,
    /// Set when the node is a junction into this share.
    pub export: Option<String>,
    pub children: Vec<PseudoNode>,
}

impl PseudoNode {
    pub fn is_export(&self) -> bool {
        self.export.is_some()
    }
}

/// The pseudo filesystem tree.
///
/// The current layout is a root with one junction child per share; the
/// traversal methods walk the general tree so nested export paths can be
/// added without touching callers.
pub struct PseudoFs {
    root: PseudoNode,
}

impl PseudoFs {
    /// Builds the tree from the current share list.
    pub fn build(registry: &ShareRegistry) -> Self {
        let children = registry
            .list()
            .into_iter()
            .enumerate()
            .map(|(index, share)| PseudoNode {
                name: share.name.clone(),
                path: format!("/{}", share.name),
                handle: FileHandle::pseudo(&format!("/{}", share.name)),
                fileid: index as u64 + 2,
                export: Some(share.name),
                children: Vec::new(),
            })
            .collect();
        PseudoFs {
            root: PseudoNode {
                name: String::new(),
                path: "/".to_owned(),
                handle: FileHandle::pseudo("/"),
                fileid: 1,
                export: None,
                children,
            },
        }
    }

    pub fn root(&self) -> &PseudoNode {
        &self.root
    }

    pub fn root_handle(&self) -> FileHandle {
        self.root.handle.clone()
    }

    /// Resolves a pseudo handle back to its node.
    pub fn node(&self, handle: &FileHandle) -> Option<&PseudoNode> {
        let path = handle.pseudo_path()?;
        self.node_by_path(path)
    }

    pub fn node_by_path(&self, path: &str) -> Option<&PseudoNode> {
        if path == "/" {
            return Some(&self.root);
        }
        let mut node = &self.root;
        for part in path.trim_start_matches('/').split('/') {
            node = node.children.iter().find(|c| c.name == part)?;
        }
        Some(node)
    }

    /// Child lookup inside a pseudo directory.
    pub fn lookup<'a>(&self, dir: &'a PseudoNode, name: &str) -> Option<&'a PseudoNode> {
        dir.children.iter().find(|c| c.name == name)
    }

    /// Parent of a pseudo node; the root is its own parent.
    pub fn parent(&self, node: &PseudoNode) -> &PseudoNode {
        match node.path.rfind('/') {
            Some(0) | None => &self.root,
            Some(split) => self.node_by_path(&node.path[..split]).unwrap_or(&self.root),
        }
    }
}
