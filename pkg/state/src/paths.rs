use anyhow::{Result, bail};
use pkg_constants::trees::{HOOK_TREE, INTENT_TREE, LOCK_TREE, REALITY_TREE};

/// The subtree a pod record lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodTree {
    /// Desired per-node placement, written by controllers.
    Intent,
    /// Observed per-node state, written by node agents.
    Reality,
    /// Lifecycle-hook pods, not bound to a host.
    Hooks,
}

impl PodTree {
    pub fn root(self) -> &'static str {
        match self {
            PodTree::Intent => INTENT_TREE,
            PodTree::Reality => REALITY_TREE,
            PodTree::Hooks => HOOK_TREE,
        }
    }
}

/// Key under which a node's pod records live, e.g. `/intent/worker-1`.
///
/// Hook pods are not scheduled by host, so for the hook tree the node is
/// ignored and the tree root comes back.
pub fn node_path(tree: PodTree, node: &str) -> Result<String> {
    if tree == PodTree::Hooks {
        return Ok(tree.root().to_string());
    }
    if node.is_empty() {
        bail!("node not specified when computing node path");
    }
    Ok(format!("{}/{}", tree.root(), node))
}

/// Key of one pod's record, e.g. `/intent/worker-1/helloworld`.
pub fn pod_path(tree: PodTree, node: &str, pod_id: &str) -> Result<String> {
    let node_path = node_path(tree, node)?;
    if pod_id.is_empty() {
        bail!("pod id not specified when computing pod path");
    }
    Ok(format!("{}/{}", node_path, pod_id))
}

/// Key to lock before acting destructively on a pod,
/// e.g. `/lock/intent/worker-1/helloworld`. Exists only while held.
pub fn pod_lock_path(tree: PodTree, node: &str, pod_id: &str) -> Result<String> {
    Ok(format!("{}{}", LOCK_TREE, pod_path(tree, node, pod_id)?))
}
