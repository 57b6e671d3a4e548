// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory graph store.
//!
//! Mirrors the host document model closely enough to exercise the
//! resolution engine:
//! - a group's in-port `i` is its inlet proxy's out-port `i`, and its
//!   out-port `i` is its outlet proxy's in-port `i`
//! - links only join siblings
//! - fan-out order is insertion order and compacts on removal
//! - unlinking an in-port of a dynamic-port node removes the port
//! - undo transactions snapshot the node table

use crate::node::{NodePath, NodeType};
use crate::store::{DestinationInfo, GraphStore, SourceInfo};
use indexmap::IndexMap;

/// Name of the inlet proxy inside its group
pub const INLET_PROXY_NAME: &str = "Multi-Port-In";

/// Name of the outlet proxy inside its group
pub const OUTLET_PROXY_NAME: &str = "Multi-Port-Out";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    node: NodePath,
    port: usize,
}

#[derive(Debug, Clone)]
struct NodeRecord {
    node_type: NodeType,
    /// Source of each in-port
    inputs: Vec<Option<Endpoint>>,
    /// Fan-out of each out-port, in link-index order
    outputs: Vec<Vec<Endpoint>>,
}

impl NodeRecord {
    fn new(node_type: NodeType, in_ports: usize, out_ports: usize) -> Self {
        Self {
            node_type,
            inputs: vec![None; in_ports],
            outputs: vec![Vec::new(); out_ports],
        }
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    name: String,
    nodes: IndexMap<NodePath, NodeRecord>,
}

/// Error when building a `MemoryStore` by hand
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryStoreError {
    /// A node with this path already exists
    #[error("Node already exists: {0}")]
    AlreadyExists(NodePath),

    /// The parent group does not exist or is not a group
    #[error("Parent group not found for {0}")]
    ParentNotFound(NodePath),

    /// Proxies are created through their group
    #[error("Proxy {0} cannot be added directly")]
    ProxyNotAllowed(NodePath),

    /// The node does not exist
    #[error("Node not found: {0}")]
    NotFound(NodePath),
}

/// Graph store held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: NodePath,
    nodes: IndexMap<NodePath, NodeRecord>,
    open: Vec<Snapshot>,
    history: Vec<Snapshot>,
}

impl MemoryStore {
    /// Create a store holding only the root group
    pub fn new(root: impl Into<NodePath>) -> Self {
        let root = root.into();
        let mut nodes = IndexMap::new();
        nodes.insert(root.clone(), NodeRecord::new(NodeType::Group, 0, 0));
        Self {
            root,
            nodes,
            open: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Path of the root group
    pub fn root(&self) -> &NodePath {
        &self.root
    }

    /// Add a node inside an existing group
    pub fn add_node(
        &mut self,
        path: impl Into<NodePath>,
        node_type: NodeType,
        in_ports: usize,
        out_ports: usize,
    ) -> Result<NodePath, MemoryStoreError> {
        let path = path.into();
        if self.nodes.contains_key(&path) {
            return Err(MemoryStoreError::AlreadyExists(path));
        }
        if node_type.is_proxy() {
            return Err(MemoryStoreError::ProxyNotAllowed(path));
        }
        let parent_is_group = path
            .parent()
            .and_then(|parent| self.nodes.get(&parent))
            .is_some_and(|record| record.node_type.is_group());
        if !parent_is_group {
            return Err(MemoryStoreError::ParentNotFound(path));
        }
        tracing::trace!("adding {node_type} node {path}");
        self.nodes
            .insert(path.clone(), NodeRecord::new(node_type, in_ports, out_ports));
        Ok(path)
    }

    /// Add an empty group
    pub fn add_group(&mut self, path: impl Into<NodePath>) -> Result<NodePath, MemoryStoreError> {
        self.add_node(path, NodeType::Group, 0, 0)
    }

    /// Remove a node, its links and, for a group, everything inside it
    pub fn remove_node(&mut self, path: &NodePath) -> Result<(), MemoryStoreError> {
        let node_type = self
            .type_of(path)
            .ok_or_else(|| MemoryStoreError::NotFound(path.clone()))?;
        if node_type.is_proxy() {
            return Err(MemoryStoreError::ProxyNotAllowed(path.clone()));
        }
        if node_type.is_group() {
            let children: Vec<NodePath> = self
                .nodes
                .keys()
                .filter(|child| path.is_ancestor_of(child))
                .cloned()
                .collect();
            for child in children.iter().rev() {
                self.detach(child);
                self.nodes.shift_remove(child);
            }
        }
        self.detach(path);
        self.nodes.shift_remove(path);
        tracing::trace!("removed node {path}");
        Ok(())
    }

    /// Every node path, in insertion order
    pub fn node_paths(&self) -> impl Iterator<Item = &NodePath> {
        self.nodes.keys()
    }

    /// Number of nodes, proxies included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Revert the last committed transaction; returns its name
    pub fn undo(&mut self) -> Option<String> {
        if !self.open.is_empty() {
            tracing::warn!("cannot undo while a transaction is open");
            return None;
        }
        let snapshot = self.history.pop()?;
        tracing::debug!("undoing {}", snapshot.name);
        self.nodes = snapshot.nodes;
        Some(snapshot.name)
    }

    /// Number of committed transactions that can be undone
    pub fn undo_depth(&self) -> usize {
        self.history.len()
    }

    fn record(&self, path: &NodePath) -> Option<&NodeRecord> {
        self.nodes.get(path)
    }

    fn record_mut(&mut self, path: &NodePath) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(path)
    }

    /// Remove every link touching `path`
    fn detach(&mut self, path: &NodePath) {
        let Some(record) = self.record(path) else {
            return;
        };
        let destinations: Vec<Endpoint> = record.outputs.iter().flatten().cloned().collect();
        let linked_inputs: Vec<usize> = record
            .inputs
            .iter()
            .enumerate()
            .filter_map(|(port, source)| source.as_ref().map(|_| port))
            .collect();
        for destination in destinations {
            self.remove_link(&destination.node, destination.port);
        }
        for port in linked_inputs.into_iter().rev() {
            self.remove_link(path, port);
        }
    }

    fn insert_in_port_raw(&mut self, path: &NodePath, at: usize) {
        for record in self.nodes.values_mut() {
            for endpoint in record.outputs.iter_mut().flatten() {
                if endpoint.node == *path && endpoint.port >= at {
                    endpoint.port += 1;
                }
            }
        }
        if let Some(record) = self.record_mut(path) {
            let at = at.min(record.inputs.len());
            record.inputs.insert(at, None);
        }
    }

    fn insert_out_port_raw(&mut self, path: &NodePath, at: usize) {
        for record in self.nodes.values_mut() {
            for endpoint in record.inputs.iter_mut().flatten() {
                if endpoint.node == *path && endpoint.port >= at {
                    endpoint.port += 1;
                }
            }
        }
        if let Some(record) = self.record_mut(path) {
            let at = at.min(record.outputs.len());
            record.outputs.insert(at, Vec::new());
        }
    }

    fn remove_in_port_raw(&mut self, path: &NodePath, at: usize) {
        if let Some(record) = self.record_mut(path) {
            if at < record.inputs.len() {
                record.inputs.remove(at);
            }
        }
        for record in self.nodes.values_mut() {
            for endpoint in record.outputs.iter_mut().flatten() {
                if endpoint.node == *path && endpoint.port > at {
                    endpoint.port -= 1;
                }
            }
        }
    }

    /// Insert an in-port and its mirror on the other side of a group boundary
    fn insert_in_port(&mut self, path: &NodePath, at: usize) {
        tracing::trace!("inserting in-port {at} on {path}");
        self.insert_in_port_raw(path, at);
        match self.type_of(path) {
            Some(NodeType::Group) => {
                if let Some(inlet) = self.find_inlet_proxy(path) {
                    self.insert_out_port_raw(&inlet, at);
                }
            }
            Some(NodeType::MultiportOut) => {
                if let Some(group) = path.parent() {
                    self.insert_out_port_raw(&group, at);
                }
            }
            _ => {}
        }
    }

    /// Insert an out-port and its mirror on the other side of a group boundary
    fn insert_out_port(&mut self, path: &NodePath, at: usize) {
        tracing::trace!("inserting out-port {at} on {path}");
        self.insert_out_port_raw(path, at);
        match self.type_of(path) {
            Some(NodeType::Group) => {
                if let Some(outlet) = self.find_outlet_proxy(path) {
                    self.insert_in_port_raw(&outlet, at);
                }
            }
            Some(NodeType::MultiportIn) => {
                if let Some(group) = path.parent() {
                    self.insert_in_port_raw(&group, at);
                }
            }
            _ => {}
        }
    }

    fn proxy(&self, group: &NodePath, name: &str) -> Option<NodePath> {
        let path = group.join(name);
        self.nodes.contains_key(&path).then_some(path)
    }
}

impl GraphStore for MemoryStore {
    fn type_of(&self, path: &NodePath) -> Option<NodeType> {
        self.record(path).map(|record| record.node_type.clone())
    }

    fn in_port_count(&self, path: &NodePath) -> usize {
        self.record(path).map_or(0, |record| record.inputs.len())
    }

    fn out_port_count(&self, path: &NodePath) -> usize {
        self.record(path).map_or(0, |record| record.outputs.len())
    }

    fn is_in_port_linked(&self, path: &NodePath, port: usize) -> bool {
        self.record(path)
            .and_then(|record| record.inputs.get(port))
            .is_some_and(Option::is_some)
    }

    fn out_link_count(&self, path: &NodePath, out_port: usize) -> usize {
        self.record(path)
            .and_then(|record| record.outputs.get(out_port))
            .map_or(0, Vec::len)
    }

    fn backward_lookup(&self, path: &NodePath, in_port: usize) -> Option<SourceInfo> {
        let source = self.record(path)?.inputs.get(in_port)?.as_ref()?;
        let link_index = self
            .record(&source.node)?
            .outputs
            .get(source.port)?
            .iter()
            .position(|endpoint| endpoint.node == *path && endpoint.port == in_port)?;
        Some(SourceInfo {
            node: source.node.clone(),
            port: source.port,
            link_index,
        })
    }

    fn forward_lookup(
        &self,
        path: &NodePath,
        out_port: usize,
        link_index: usize,
    ) -> Option<DestinationInfo> {
        let endpoint = self.record(path)?.outputs.get(out_port)?.get(link_index)?;
        Some(DestinationInfo {
            node: endpoint.node.clone(),
            port: endpoint.port,
        })
    }

    fn create_link(
        &mut self,
        src: &NodePath,
        src_port: usize,
        dst: &NodePath,
        dst_port: usize,
        create_out_port: bool,
        create_in_port: bool,
    ) -> bool {
        let (Some(src_type), Some(dst_type)) = (self.type_of(src), self.type_of(dst)) else {
            tracing::debug!("cannot link {src} -> {dst}: missing node");
            return false;
        };
        if src == dst || src.parent().is_none() || src.parent() != dst.parent() {
            tracing::debug!("cannot link {src} -> {dst}: not siblings");
            return false;
        }

        let mut src_port = src_port;
        let out_count = self.out_port_count(src);
        if src_port >= out_count {
            if !(create_out_port && src_type.can_create_out_ports()) {
                tracing::debug!("cannot link {src} -> {dst}: no out-port {src_port}");
                return false;
            }
            src_port = out_count;
            self.insert_out_port(src, src_port);
        }

        let mut dst_port = dst_port;
        let in_count = self.in_port_count(dst);
        let may_create_in = create_in_port && dst_type.can_create_in_ports();
        if dst_port >= in_count {
            if !may_create_in {
                tracing::debug!("cannot link {src} -> {dst}: no in-port {dst_port}");
                return false;
            }
            dst_port = in_count;
            self.insert_in_port(dst, dst_port);
        } else if self.is_in_port_linked(dst, dst_port) {
            if !may_create_in {
                tracing::debug!("cannot link {src} -> {dst}: in-port {dst_port} occupied");
                return false;
            }
            self.insert_in_port(dst, dst_port);
        }

        if let Some(record) = self.record_mut(dst) {
            record.inputs[dst_port] = Some(Endpoint {
                node: src.clone(),
                port: src_port,
            });
        }
        if let Some(record) = self.record_mut(src) {
            record.outputs[src_port].push(Endpoint {
                node: dst.clone(),
                port: dst_port,
            });
        }
        tracing::trace!("linked {src}[{src_port}] -> {dst}[{dst_port}]");
        true
    }

    fn remove_link(&mut self, dst: &NodePath, dst_port: usize) {
        let Some(record) = self.record_mut(dst) else {
            return;
        };
        let Some(source) = record.inputs.get_mut(dst_port).and_then(Option::take) else {
            return;
        };
        let compacts = record.node_type.compacts_in_ports();
        if let Some(fan_out) = self
            .record_mut(&source.node)
            .and_then(|record| record.outputs.get_mut(source.port))
        {
            fan_out.retain(|endpoint| !(endpoint.node == *dst && endpoint.port == dst_port));
        }
        if compacts {
            self.remove_in_port_raw(dst, dst_port);
        }
        tracing::trace!("unlinked {}[{}] -> {dst}[{dst_port}]", source.node, source.port);
    }

    fn inlet_proxy_of(&mut self, group: &NodePath) -> Option<NodePath> {
        let in_ports = self.record(group).filter(|r| r.node_type.is_group())?.inputs.len();
        if let Some(existing) = self.proxy(group, INLET_PROXY_NAME) {
            return Some(existing);
        }
        let path = group.join(INLET_PROXY_NAME);
        tracing::trace!("creating inlet proxy {path}");
        self.nodes
            .insert(path.clone(), NodeRecord::new(NodeType::MultiportIn, 0, in_ports));
        Some(path)
    }

    fn outlet_proxy_of(&mut self, group: &NodePath) -> Option<NodePath> {
        let out_ports = self.record(group).filter(|r| r.node_type.is_group())?.outputs.len();
        if let Some(existing) = self.proxy(group, OUTLET_PROXY_NAME) {
            return Some(existing);
        }
        let path = group.join(OUTLET_PROXY_NAME);
        tracing::trace!("creating outlet proxy {path}");
        self.nodes
            .insert(path.clone(), NodeRecord::new(NodeType::MultiportOut, out_ports, 0));
        Some(path)
    }

    fn find_inlet_proxy(&self, group: &NodePath) -> Option<NodePath> {
        self.proxy(group, INLET_PROXY_NAME)
    }

    fn find_outlet_proxy(&self, group: &NodePath) -> Option<NodePath> {
        self.proxy(group, OUTLET_PROXY_NAME)
    }

    fn sub_nodes(&self, group: &NodePath) -> Vec<NodePath> {
        self.nodes
            .keys()
            .filter(|path| path.parent().as_ref() == Some(group))
            .cloned()
            .collect()
    }

    fn add_in_port(&mut self, group: &NodePath, at: usize) -> Option<usize> {
        if !self.is_group(group) {
            return None;
        }
        let at = at.min(self.in_port_count(group));
        self.insert_in_port(group, at);
        Some(at)
    }

    fn add_out_port(&mut self, group: &NodePath, at: usize) -> Option<usize> {
        if !self.is_group(group) {
            return None;
        }
        let at = at.min(self.out_port_count(group));
        self.insert_out_port(group, at);
        Some(at)
    }

    fn begin_undo(&mut self, name: &str) {
        self.open.push(Snapshot {
            name: name.to_string(),
            nodes: self.nodes.clone(),
        });
    }

    fn end_undo(&mut self) {
        if let Some(snapshot) = self.open.pop() {
            if self.open.is_empty() {
                self.history.push(snapshot);
            }
        }
    }

    fn cancel_undo(&mut self) {
        if let Some(snapshot) = self.open.pop() {
            tracing::debug!("rolling back {}", snapshot.name);
            self.nodes = snapshot.nodes;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("Top")
    }
}
