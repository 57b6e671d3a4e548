// SPDX-License-Identifier: MIT OR Apache-2.0
//! Errors raised while resolving or mutating links.

use crate::node::NodePath;
use crate::port::PortDirection;

/// Error when resolving, creating or removing a link
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// An endpoint node does not exist in the store
    #[error("Node not found: {0}")]
    NotFound(NodePath),

    /// The destination in-port already has a connection
    #[error("Port {port} of node {node} is already occupied")]
    PortOccupied {
        /// Destination node
        node: NodePath,
        /// Occupied in-port
        port: usize,
    },

    /// No free port and creation is disallowed
    #[error("No free {direction} port on node {node}")]
    NoFreePort {
        /// Node that was searched
        node: NodePath,
        /// Direction of the missing port
        direction: PortDirection,
    },

    /// The two endpoints share no ancestor group
    #[error("No common group between {start} and {end}")]
    NoCommonScope {
        /// Start node
        start: NodePath,
        /// End node
        end: NodePath,
    },

    /// A hop of a multi-scope connection failed after earlier hops were wired
    #[error("Connection failed at hop {hop}: {source}")]
    PartialMultiHopFailure {
        /// Index of the failing hop in the path
        hop: usize,
        /// Why the hop failed
        source: Box<LinkError>,
    },

    /// A scope traversal revisited a node or exceeded the depth limit
    #[error("Cycle detected while traversing scopes at {0}")]
    CycleDetected(NodePath),

    /// Single-scope operation requested on endpoints in different groups
    #[error("Link crosses a scope boundary: {0}")]
    CrossScope(String),

    /// The operation requires an existing connection
    #[error("Link is not connected: {0}")]
    NotLinked(String),

    /// The store refused the link primitive
    #[error("Graph store rejected link: {0}")]
    Rejected(String),

    /// Inserting a node failed and the original connection was restored
    #[error("Failed to insert {node} into {link}")]
    InsertFailed {
        /// Node that was being inserted
        node: NodePath,
        /// Link it was inserted into
        link: String,
    },

    /// A batched update did not produce the requested connection
    #[error("Failed to apply link update: {0}")]
    ApplyFailed(String),
}

impl LinkError {
    /// Wrap this error as the failure of one hop of a path
    pub fn at_hop(self, hop: usize) -> Self {
        Self::PartialMultiHopFailure {
            hop,
            source: Box::new(self),
        }
    }
}
