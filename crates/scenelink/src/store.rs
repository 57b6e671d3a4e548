// SPDX-License-Identifier: MIT OR Apache-2.0
//! The graph store boundary.
//!
//! Everything the resolution engine knows about the graph comes through
//! [`GraphStore`]. All calls are synchronous and addressed by node path and
//! port index.

use crate::node::{NodePath, NodeType};
use serde::{Deserialize, Serialize};

/// Source of an in-port connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Node feeding the in-port
    pub node: NodePath,
    /// Out-port of that node
    pub port: usize,
    /// Fan-out position of this connection on that out-port
    pub link_index: usize,
}

/// Destination of one fan-out connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationInfo {
    /// Node receiving the connection
    pub node: NodePath,
    /// In-port of that node
    pub port: usize,
}

/// Authoritative node, port and link storage
pub trait GraphStore {
    /// Type of a node, `None` when it does not exist
    fn type_of(&self, path: &NodePath) -> Option<NodeType>;

    /// Whether the node is a group
    fn is_group(&self, path: &NodePath) -> bool {
        self.type_of(path).is_some_and(|t| t.is_group())
    }

    /// Number of in-ports
    fn in_port_count(&self, path: &NodePath) -> usize;

    /// Number of out-ports
    fn out_port_count(&self, path: &NodePath) -> usize;

    /// Whether an in-port has a connection
    fn is_in_port_linked(&self, path: &NodePath, port: usize) -> bool;

    /// Number of fan-out connections on an out-port
    fn out_link_count(&self, path: &NodePath, out_port: usize) -> usize;

    /// Follow an in-port backward to its source
    fn backward_lookup(&self, path: &NodePath, in_port: usize) -> Option<SourceInfo>;

    /// Follow one fan-out connection of an out-port forward
    fn forward_lookup(
        &self,
        path: &NodePath,
        out_port: usize,
        link_index: usize,
    ) -> Option<DestinationInfo>;

    /// Connect `src_port` of `src` to `dst_port` of `dst`
    fn create_link(
        &mut self,
        src: &NodePath,
        src_port: usize,
        dst: &NodePath,
        dst_port: usize,
        create_out_port: bool,
        create_in_port: bool,
    ) -> bool;

    /// Remove the connection feeding an in-port
    fn remove_link(&mut self, dst: &NodePath, dst_port: usize);

    /// Inlet proxy of a group, created on first access
    fn inlet_proxy_of(&mut self, group: &NodePath) -> Option<NodePath>;

    /// Outlet proxy of a group, created on first access
    fn outlet_proxy_of(&mut self, group: &NodePath) -> Option<NodePath>;

    /// Inlet proxy of a group, without creating it
    fn find_inlet_proxy(&self, group: &NodePath) -> Option<NodePath>;

    /// Outlet proxy of a group, without creating it
    fn find_outlet_proxy(&self, group: &NodePath) -> Option<NodePath>;

    /// Direct children of a group
    fn sub_nodes(&self, group: &NodePath) -> Vec<NodePath>;

    /// Insert an in-port on a group; returns the index actually used
    fn add_in_port(&mut self, group: &NodePath, at: usize) -> Option<usize>;

    /// Insert an out-port on a group; returns the index actually used
    fn add_out_port(&mut self, group: &NodePath, at: usize) -> Option<usize>;

    /// Open an undo transaction
    fn begin_undo(&mut self, _name: &str) {}

    /// Close the innermost undo transaction, keeping its changes
    fn end_undo(&mut self) {}

    /// Close the innermost undo transaction, discarding its changes
    fn cancel_undo(&mut self) {}
}

/// Run `f` inside an undo transaction; cancel the transaction if it fails
pub fn with_undo<S, T, E, F>(store: &mut S, name: &str, f: F) -> Result<T, E>
where
    S: GraphStore + ?Sized,
    F: FnOnce(&mut S) -> Result<T, E>,
{
    store.begin_undo(name);
    let result = f(store);
    if result.is_ok() {
        store.end_undo();
    } else {
        tracing::debug!("cancelling undo transaction {name}");
        store.cancel_undo();
    }
    result
}
