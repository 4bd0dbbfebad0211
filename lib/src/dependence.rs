/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Data dependence graphs over scheduling units.
//!
//! A graph is a table of nodes, each naming an instruction, plus latency
//! edges between them.  The same instruction may appear in two nodes: when
//! a loop body is placed after itself to look across the backedge, the nodes
//! before the boundary are the current iteration and the ones after it are
//! the next.  Edges are only ever computed in flow order, once per node
//! pair.

use log::trace;
use smallvec::SmallVec;

use crate::data_structures::{InstIx, Map, Reg};
use crate::interface::{Function, MemAccess, SchedModel};

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeIx(u32);

impl NodeIx {
  pub fn new(n: u32) -> Self {
    NodeIx(n)
  }
  pub fn get(self) -> usize {
    self.0 as usize
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DepKind {
  /// Read after write.
  Data,
  /// Write after read.
  Anti,
  /// Write after write.
  Output,
  /// Ordering of memory accesses.
  Memory,
}

#[derive(Copy, Clone, Debug)]
pub struct DepEdge {
  /// The other end of the edge: the successor in a |succs| list, the
  /// predecessor in a |preds| list.
  pub node: NodeIx,
  pub latency: i32,
  pub kind: DepKind,
}

struct NodeInfo {
  inst: InstIx,
  defs: SmallVec<[Reg; 4]>,
  uses: SmallVec<[Reg; 4]>,
  mem: MemAccess,
  latency: i32,
  max_latency: i32,
}

pub struct DataDependenceGraph {
  nodes: Vec<NodeInfo>,
  succs: Vec<SmallVec<[DepEdge; 4]>>,
  preds: Vec<SmallVec<[DepEdge; 4]>>,
  boundary: Option<usize>,
  // Lookup from instruction to node, for both sides of the boundary.
  pre_map: Map<InstIx, NodeIx>,
  post_map: Map<InstIx, NodeIx>,
  built: bool,
}

impl DataDependenceGraph {
  pub fn new() -> Self {
    Self {
      nodes: vec![],
      succs: vec![],
      preds: vec![],
      boundary: None,
      pre_map: Map::default(),
      post_map: Map::default(),
      built: false,
    }
  }

  /// Add a scheduling unit for |iix|.  Units must be added in flow order.
  pub fn add_node<F: Function>(
    &mut self, func: &F, model: &dyn SchedModel, iix: InstIx,
  ) -> NodeIx {
    assert!(!self.built, "DataDependenceGraph: adding to a built graph");
    let insn = func.get_insn(iix);
    let regs = func.get_regs(insn);
    let itin = model.itinerary(func.opcode(insn));
    let node = NodeIx::new(self.nodes.len() as u32);
    self.nodes.push(NodeInfo {
      inst: iix,
      defs: regs.defined,
      uses: regs.used,
      mem: func.mem_access(insn),
      latency: itin.latency as i32,
      max_latency: itin.max_latency() as i32,
    });
    self.succs.push(SmallVec::new());
    self.preds.push(SmallVec::new());
    if self.boundary.is_some() {
      self.post_map.entry(iix).or_insert(node);
    } else {
      self.pre_map.entry(iix).or_insert(node);
    }
    node
  }

  /// All units added from now on are on the far side of the boundary.
  pub fn mark_boundary(&mut self) {
    assert!(self.boundary.is_none(), "DataDependenceGraph: two boundaries");
    self.boundary = Some(self.nodes.len());
  }

  pub fn num_nodes(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_built(&self) -> bool {
    self.built
  }

  /// Compute all edges.  After this the graph is read-only.
  #[inline(never)]
  pub fn build_edges(&mut self) {
    assert!(!self.built);
    let n = self.nodes.len();
    for j in 0..n {
      for i in 0..j {
        for (kind, latency) in self.dependences(i, j) {
          let edge_to = DepEdge { node: NodeIx::new(j as u32), latency, kind };
          let edge_from = DepEdge { node: NodeIx::new(i as u32), latency, kind };
          trace!(
            "dep {:?} -> {:?}: {:?} lat {}",
            self.nodes[i].inst,
            self.nodes[j].inst,
            kind,
            latency
          );
          self.succs[i].push(edge_to);
          self.preds[j].push(edge_from);
        }
      }
    }
    self.built = true;
  }

  // The dependences of the later node |j| on the earlier node |i|.  At most
  // one edge per kind.
  fn dependences(&self, i: usize, j: usize) -> SmallVec<[(DepKind, i32); 2]> {
    let a = &self.nodes[i];
    let b = &self.nodes[j];
    let mut res = SmallVec::new();

    if a.defs.iter().any(|d| b.uses.contains(d)) {
      res.push((DepKind::Data, a.latency));
    }
    if a.defs.iter().any(|d| b.defs.contains(d)) {
      // The later write must land after the earlier one.
      res.push((DepKind::Output, 1.max(a.latency - b.latency + 1)));
    }
    if a.uses.iter().any(|u| b.defs.contains(u)) {
      res.push((DepKind::Anti, 0));
    }

    let mem_lat = if a.mem == MemAccess::Barrier || b.mem == MemAccess::Barrier
    {
      if a.mem != MemAccess::None && b.mem != MemAccess::None {
        Some(1)
      } else {
        None
      }
    } else if a.mem.may_store() && b.mem.may_load() {
      Some(a.max_latency)
    } else if a.mem.may_store() && b.mem.may_store() {
      Some(1)
    } else if a.mem.may_load() && b.mem.may_store() {
      Some(0)
    } else {
      None
    };
    if let Some(lat) = mem_lat {
      res.push((DepKind::Memory, lat));
    }
    res
  }

  pub fn inst(&self, node: NodeIx) -> InstIx {
    self.nodes[node.get()].inst
  }

  pub fn succs(&self, node: NodeIx) -> &[DepEdge] {
    debug_assert!(self.built);
    &self.succs[node.get()]
  }

  pub fn preds(&self, node: NodeIx) -> &[DepEdge] {
    debug_assert!(self.built);
    &self.preds[node.get()]
  }

  pub fn is_post_boundary_node(&self, node: NodeIx) -> bool {
    match self.boundary {
      Some(b) => node.get() >= b,
      None => false,
    }
  }

  /// The unit for |iix| before the boundary (or anywhere, if the graph has
  /// no boundary).
  pub fn pre_boundary_node(&self, iix: InstIx) -> Option<NodeIx> {
    self.pre_map.get(&iix).cloned()
  }

  pub fn post_boundary_node(&self, iix: InstIx) -> Option<NodeIx> {
    self.post_map.get(&iix).cloned()
  }

  /// Dependents of |node| on the far side of the boundary.
  pub fn post_boundary_succs(
    &self, node: NodeIx,
  ) -> impl Iterator<Item = &DepEdge> {
    self.succs(node).iter().filter(move |e| self.is_post_boundary_node(e.node))
  }

  pub fn max_latency(&self, node: NodeIx) -> i32 {
    self.nodes[node.get()].max_latency
  }
}

/// Does |dst| have to stay ordered after |src|?  True if they touch a common
/// register in a way other than both reading it, or if both access memory
/// and at least one of them writes.
pub fn depends<F: Function>(func: &F, src: InstIx, dst: InstIx) -> bool {
  let a = func.get_insn(src);
  let b = func.get_insn(dst);
  let ra = func.get_regs(a);
  let rb = func.get_regs(b);
  let touches = |r: &Reg| rb.defined.contains(r) || rb.used.contains(r);
  if ra.defined.iter().any(touches) {
    return true;
  }
  if ra.used.iter().any(|r| rb.defined.contains(r)) {
    return true;
  }
  let (ma, mb) = (func.mem_access(a), func.mem_access(b));
  ma != MemAccess::None
    && mb != MemAccess::None
    && (ma.may_store() || mb.may_store())
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::bundle::test::{ALU_OP, LD_OP};
  use crate::region_scheduler::test::{all_insns, Model, Straight};

  fn kinds(edges: &[DepEdge]) -> Vec<(usize, DepKind, i32)> {
    edges.iter().map(|e| (e.node.get(), e.kind, e.latency)).collect()
  }

  // ld r1; alu r2 <- r1; alu r1 <- r2
  fn chain() -> Straight {
    Straight(vec![
      (LD_OP, Some(1), None),
      (ALU_OP, Some(2), Some(1)),
      (ALU_OP, Some(1), Some(2)),
    ])
  }

  #[test]
  fn register_edges() {
    let f = chain();
    let model = Model::new();
    let mut ddg = DataDependenceGraph::new();
    for iix in all_insns(&f) {
      ddg.add_node(&f, &model, iix);
    }
    ddg.build_edges();
    assert!(ddg.is_built());

    let n = NodeIx::new;
    assert_eq!(
      kinds(ddg.succs(n(0))),
      vec![(1, DepKind::Data, 3), (2, DepKind::Output, 3)]
    );
    assert_eq!(
      kinds(ddg.succs(n(1))),
      vec![(2, DepKind::Data, 1), (2, DepKind::Anti, 0)]
    );
    assert_eq!(kinds(ddg.preds(n(2))).len(), 3);
    assert!(ddg.succs(n(2)).is_empty());
    assert!(!ddg.is_post_boundary_node(n(2)));
  }

  #[test]
  fn boundary_maps_both_copies() {
    let f = chain();
    let model = Model::new();
    let mut ddg = DataDependenceGraph::new();
    for iix in all_insns(&f) {
      ddg.add_node(&f, &model, iix);
    }
    ddg.mark_boundary();
    for iix in all_insns(&f) {
      ddg.add_node(&f, &model, iix);
    }
    ddg.build_edges();
    assert_eq!(ddg.num_nodes(), 6);

    let first = InstIx::new(0);
    assert_eq!(ddg.pre_boundary_node(first), Some(NodeIx::new(0)));
    assert_eq!(ddg.post_boundary_node(first), Some(NodeIx::new(3)));
    assert_eq!(ddg.inst(NodeIx::new(3)), first);
    assert!(ddg.is_post_boundary_node(NodeIx::new(3)));

    // The last instruction of one iteration feeds the next one.
    let across: Vec<usize> =
      ddg.post_boundary_succs(NodeIx::new(2)).map(|e| e.node.get()).collect();
    assert_eq!(across, vec![3, 4, 4, 5]);
  }

  #[test]
  #[should_panic]
  fn adding_to_a_built_graph_panics() {
    let f = chain();
    let model = Model::new();
    let mut ddg = DataDependenceGraph::new();
    ddg.build_edges();
    ddg.add_node(&f, &model, InstIx::new(0));
  }

  #[test]
  fn loads_reorder_freely() {
    let f = Straight(vec![
      (LD_OP, Some(1), None),
      (LD_OP, Some(2), None),
      (ALU_OP, Some(3), Some(1)),
    ]);
    let (a, b, c) = (InstIx::new(0), InstIx::new(1), InstIx::new(2));
    assert!(!depends(&f, a, b));
    assert!(depends(&f, a, c));
    assert!(!depends(&f, b, c));
  }
}
