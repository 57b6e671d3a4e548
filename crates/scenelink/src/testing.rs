// SPDX-License-Identifier: MIT OR Apache-2.0
//! A [`MemoryStore`] wrapper that misbehaves on request.

use crate::memory::MemoryStore;
use crate::node::{NodePath, NodeType};
use crate::store::{DestinationInfo, GraphStore, SourceInfo};
use std::collections::HashMap;

/// Delegates to a [`MemoryStore`], except where told to fail or lie
pub(crate) struct FaultyStore {
    pub inner: MemoryStore,
    /// Links still allowed before `create_link` starts refusing
    pub link_budget: Option<usize>,
    /// Forced answers for `backward_lookup`, keyed by node and in-port
    pub sources: HashMap<(NodePath, usize), SourceInfo>,
    /// Forced answers for `forward_lookup`, keyed by node, out-port and fan-out index
    pub destinations: HashMap<(NodePath, usize, usize), DestinationInfo>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            link_budget: None,
            sources: HashMap::new(),
            destinations: HashMap::new(),
        }
    }

    pub fn with_link_budget(mut self, budget: usize) -> Self {
        self.link_budget = Some(budget);
        self
    }

    pub fn with_source(mut self, node: &str, in_port: usize, source: &str, port: usize) -> Self {
        self.sources.insert(
            (node.into(), in_port),
            SourceInfo {
                node: source.into(),
                port,
                link_index: 0,
            },
        );
        self
    }

    pub fn with_destination(
        mut self,
        node: &str,
        out_port: usize,
        destination: &str,
        port: usize,
    ) -> Self {
        self.destinations.insert(
            (node.into(), out_port, 0),
            DestinationInfo {
                node: destination.into(),
                port,
            },
        );
        self
    }
}

impl GraphStore for FaultyStore {
    fn type_of(&self, path: &NodePath) -> Option<NodeType> {
        self.inner.type_of(path)
    }

    fn in_port_count(&self, path: &NodePath) -> usize {
        self.inner.in_port_count(path)
    }

    fn out_port_count(&self, path: &NodePath) -> usize {
        self.inner.out_port_count(path)
    }

    fn is_in_port_linked(&self, path: &NodePath, port: usize) -> bool {
        self.inner.is_in_port_linked(path, port)
    }

    fn out_link_count(&self, path: &NodePath, out_port: usize) -> usize {
        self.inner.out_link_count(path, out_port)
    }

    fn backward_lookup(&self, path: &NodePath, in_port: usize) -> Option<SourceInfo> {
        match self.sources.get(&(path.clone(), in_port)) {
            Some(source) => Some(source.clone()),
            None => self.inner.backward_lookup(path, in_port),
        }
    }

    fn forward_lookup(
        &self,
        path: &NodePath,
        out_port: usize,
        link_index: usize,
    ) -> Option<DestinationInfo> {
        match self.destinations.get(&(path.clone(), out_port, link_index)) {
            Some(destination) => Some(destination.clone()),
            None => self.inner.forward_lookup(path, out_port, link_index),
        }
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
        match &mut self.link_budget {
            Some(0) => return false,
            Some(budget) => *budget -= 1,
            None => {}
        }
        self.inner
            .create_link(src, src_port, dst, dst_port, create_out_port, create_in_port)
    }

    fn remove_link(&mut self, dst: &NodePath, dst_port: usize) {
        self.inner.remove_link(dst, dst_port);
    }

    fn inlet_proxy_of(&mut self, group: &NodePath) -> Option<NodePath> {
        self.inner.inlet_proxy_of(group)
    }

    fn outlet_proxy_of(&mut self, group: &NodePath) -> Option<NodePath> {
        self.inner.outlet_proxy_of(group)
    }

    fn find_inlet_proxy(&self, group: &NodePath) -> Option<NodePath> {
        self.inner.find_inlet_proxy(group)
    }

    fn find_outlet_proxy(&self, group: &NodePath) -> Option<NodePath> {
        self.inner.find_outlet_proxy(group)
    }

    fn sub_nodes(&self, group: &NodePath) -> Vec<NodePath> {
        self.inner.sub_nodes(group)
    }

    fn add_in_port(&mut self, group: &NodePath, at: usize) -> Option<usize> {
        self.inner.add_in_port(group, at)
    }

    fn add_out_port(&mut self, group: &NodePath, at: usize) -> Option<usize> {
        self.inner.add_out_port(group, at)
    }

    fn begin_undo(&mut self, name: &str) {
        self.inner.begin_undo(name);
    }

    fn end_undo(&mut self) {
        self.inner.end_undo();
    }

    fn cancel_undo(&mut self) {
        self.inner.cancel_undo();
    }
}
