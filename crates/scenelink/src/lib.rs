// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port and link resolution for hierarchically scoped node graphs.
//!
//! Nodes live inside groups. A group exposes two boundary proxies: an inlet
//! that surfaces the group's in-ports to its children, and an outlet that
//! collects the children's outputs into the group's out-ports. Connecting
//! two nodes in different groups means routing through those proxies level
//! by level.
//!
//! ## Architecture
//!
//! - [`GraphStore`]: the authoritative node/port/link storage, injected
//! - Port model: per-node port counts, link counts and free-port policy
//! - [`Link`]: a single-scope connection descriptor with lazy validation
//! - [`NodeLink`]: a connection descriptor with batched endpoint changes
//! - [`LinkPath`]: a multi-scope connection routed through proxies
//!
//! [`MemoryStore`] is an in-memory store used by tests and tooling.

pub mod error;
pub mod link;
pub mod link_path;
pub mod memory;
pub mod node;
pub mod node_link;
pub mod port;
pub mod scene;
pub mod settings;
pub mod store;
#[cfg(test)]
mod testing;

pub use error::LinkError;
pub use link::{Link, LinkState};
pub use link_path::LinkPath;
pub use memory::MemoryStore;
pub use node::{Node, NodePath, NodeType};
pub use node_link::{ApplyOutcome, ApplyPlan, NodeLink, NodeLinkUpdate, PathHop};
pub use port::{Port, PortDirection};
pub use scene::{LinkDescription, NodeDescription, SceneDescription, SceneError};
pub use settings::{LinkSettings, SettingsError};
pub use store::{with_undo, DestinationInfo, GraphStore, SourceInfo};
