// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scene descriptions.
//!
//! A [`SceneDescription`] is a flat RON snapshot of a [`MemoryStore`]: every
//! node with its type and port counts, then every link in fan-out order.
//! Nodes are listed parents first, so a description can be replayed into an
//! empty store.

use crate::memory::MemoryStore;
use crate::node::{NodePath, NodeType};
use crate::store::GraphStore;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error when loading, saving or replaying a scene description
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// Reading or writing the file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid scene RON
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// The scene could not be serialized
    #[error("Serialize error: {0}")]
    Serialize(#[from] ron::Error),

    /// A node could not be added to the store
    #[error("Invalid node {path}: {reason}")]
    InvalidNode {
        /// Node that was rejected
        path: NodePath,
        /// Why it was rejected
        reason: String,
    },

    /// A link could not be created in the store
    #[error("Invalid link {0}")]
    InvalidLink(String),
}

/// One node of a scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Full node path
    pub path: NodePath,
    /// Host type tag
    pub node_type: NodeType,
    /// Number of in-ports
    #[serde(default)]
    pub in_ports: usize,
    /// Number of out-ports
    #[serde(default)]
    pub out_ports: usize,
}

/// One link of a scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDescription {
    /// Source node
    pub from: NodePath,
    /// Source out-port
    pub from_port: usize,
    /// Destination node
    pub to: NodePath,
    /// Destination in-port
    pub to_port: usize,
}

/// A whole scene: the root group, its nodes and their links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Root group
    pub root: NodePath,
    /// Nodes, parents before children
    #[serde(default)]
    pub nodes: Vec<NodeDescription>,
    /// Links, in fan-out order per out-port
    #[serde(default)]
    pub links: Vec<LinkDescription>,
}

impl SceneDescription {
    /// Parse a scene from RON
    pub fn from_ron(s: &str) -> Result<Self, SceneError> {
        Ok(ron::from_str(s)?)
    }

    /// Serialize the scene to pretty RON
    pub fn to_ron(&self) -> Result<String, SceneError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Load a scene from a file
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let content = std::fs::read_to_string(path)?;
        let scene = Self::from_ron(&content)?;
        tracing::debug!(
            "loaded scene {} ({} nodes, {} links) from {}",
            scene.root,
            scene.nodes.len(),
            scene.links.len(),
            path.display()
        );
        Ok(scene)
    }

    /// Save the scene to a file
    pub fn save(&self, path: &Path) -> Result<(), SceneError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}

impl MemoryStore {
    /// Build a store by replaying a scene description
    pub fn from_description(scene: &SceneDescription) -> Result<Self, SceneError> {
        let mut store = MemoryStore::new(scene.root.clone());
        for node in &scene.nodes {
            store.replay_node(node)?;
        }
        for link in &scene.links {
            let created =
                store.create_link(&link.from, link.from_port, &link.to, link.to_port, false, false);
            if !created {
                return Err(SceneError::InvalidLink(format!(
                    "{}[{}] -> {}[{}]",
                    link.from, link.from_port, link.to, link.to_port
                )));
            }
        }
        Ok(store)
    }

    fn replay_node(&mut self, node: &NodeDescription) -> Result<(), SceneError> {
        let invalid = |reason: String| SceneError::InvalidNode {
            path: node.path.clone(),
            reason,
        };
        match &node.node_type {
            NodeType::MultiportIn | NodeType::MultiportOut => {
                let group = node
                    .path
                    .parent()
                    .ok_or_else(|| invalid("proxy without a group".to_string()))?;
                let proxy = if node.node_type == NodeType::MultiportIn {
                    self.inlet_proxy_of(&group)
                } else {
                    self.outlet_proxy_of(&group)
                };
                if proxy.as_ref() != Some(&node.path) {
                    return Err(invalid(format!("not the {} proxy of {group}", node.node_type)));
                }
            }
            NodeType::Group => {
                if node.path != *self.root() {
                    self.add_group(node.path.clone())
                        .map_err(|err| invalid(err.to_string()))?;
                }
                for at in self.in_port_count(&node.path)..node.in_ports {
                    self.add_in_port(&node.path, at);
                }
                for at in self.out_port_count(&node.path)..node.out_ports {
                    self.add_out_port(&node.path, at);
                }
            }
            other => {
                self.add_node(node.path.clone(), other.clone(), node.in_ports, node.out_ports)
                    .map_err(|err| invalid(err.to_string()))?;
            }
        }
        Ok(())
    }

    /// Snapshot this store as a scene description
    pub fn describe(&self) -> SceneDescription {
        let mut nodes = Vec::new();
        let mut links = Vec::new();
        for path in self.node_paths() {
            let Some(node_type) = self.type_of(path) else {
                continue;
            };
            let out_ports = self.out_port_count(path);
            nodes.push(NodeDescription {
                path: path.clone(),
                node_type,
                in_ports: self.in_port_count(path),
                out_ports,
            });
            for port in 0..out_ports {
                for index in 0..self.out_link_count(path, port) {
                    if let Some(destination) = self.forward_lookup(path, port, index) {
                        links.push(LinkDescription {
                            from: path.clone(),
                            from_port: port,
                            to: destination.node,
                            to_port: destination.port,
                        });
                    }
                }
            }
        }
        SceneDescription {
            root: self.root().clone(),
            nodes,
            links,
        }
    }
}
