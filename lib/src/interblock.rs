/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Inter-block scheduling: the order in which blocks are scheduled, the
//! latency and resource assumptions made at a block's end, and the fixed
//! point iteration that makes single-block loops safe across their backedge.
//!
//! A single-block loop is first scheduled optimistically: its tail is
//! assumed free and its results are assumed to be consumed early.  After
//! each pass the bottom of the schedule is overlaid onto its top.  If that
//! shows a latency or a resource violation, the corresponding margin is
//! raised and the loop is scheduled again.  Once it converges, whatever
//! still sticks out of the loop is covered by no-op cycles at the start of
//! the loop's epilogue.

use log::{debug, info, trace};
use std::fmt;

use crate::analysis::CFGInfo;
use crate::bundle::Bundle;
use crate::data_structures::{BlockIx, InstIx, Map, TypedIxVec};
use crate::dependence::{depends, DataDependenceGraph};
use crate::hazard::HazardRecognizer;
use crate::interface::{Function, SchedModel, SchedOptions, SlotCatalog};
use crate::region_scheduler::tail_scoreboard;
use crate::scoreboard::{FuncUnitCycle, ResourceScoreboard};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum BlockType {
  Regular,
  Loop,
  Epilogue,
}

/// One scheduling window of a block: its instructions in their original
/// order, and the bundles they were scheduled into.
#[derive(Clone, Debug)]
pub struct Region {
  insns: Vec<InstIx>,
  bundles: Vec<Bundle<InstIx>>,
}

impl Region {
  pub fn new(insns: Vec<InstIx>) -> Self {
    Self { insns, bundles: vec![] }
  }
  pub fn insns(&self) -> &[InstIx] {
    &self.insns
  }
  pub fn bundles(&self) -> &[Bundle<InstIx>] {
    &self.bundles
  }
}

#[derive(Clone, Debug, Default)]
pub struct FixedpointState {
  pub scheduled: bool,
  pub latency_margin: i32,
  pub resource_margin: i32,
  pub max_latency_extent: i32,
  pub max_resource_extent: i32,
  /// Number of passes that failed to converge.
  pub iterations: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergenceResult {
  Converged,
  RetryWithMargins { latency: i32, resource: i32 },
  Fatal,
}

pub struct BlockState {
  pub kind: BlockType,
  regions: Vec<Region>,
  pub fixpoint: FixedpointState,
  // Distinct successors, in CFG order.
  succs: Vec<BlockIx>,
  // Built after the first pass over a loop.
  boundary_graph: Option<DataDependenceGraph>,
  loop_pred: Option<BlockIx>,
  entry_nops: u32,
}

impl BlockState {
  fn new<F: Function>(func: &F, cfg: &CFGInfo, b: BlockIx) -> Self {
    Self {
      kind: BlockType::Regular,
      regions: split_regions(func, b),
      fixpoint: FixedpointState::default(),
      succs: cfg.unique_succs(b),
      boundary_graph: None,
      loop_pred: None,
      entry_nops: 0,
    }
  }

  pub fn regions(&self) -> &[Region] {
    &self.regions
  }

  pub fn is_scheduled(&self) -> bool {
    self.fixpoint.scheduled
  }

  /// The bundles of the first region.
  pub fn top_bundles(&self) -> &[Bundle<InstIx>] {
    self.regions.first().map_or(&[][..], |r| r.bundles.as_slice())
  }

  pub fn top(&self) -> &Region {
    &self.regions[0]
  }

  pub fn bottom(&self) -> &Region {
    &self.regions[self.regions.len() - 1]
  }

  pub fn loop_predecessor(&self) -> Option<BlockIx> {
    self.loop_pred
  }

  /// The number of no-op cycles put at the start of this block.
  pub fn entry_nops(&self) -> u32 {
    self.entry_nops
  }

  /// The number of cycles an epilogue has to wait for this loop.
  pub fn safety_margin(&self) -> i32 {
    assert!(self.kind == BlockType::Loop);
    assert!(self.is_scheduled());
    self.fixpoint.max_latency_extent.max(self.fixpoint.max_resource_extent)
  }

  pub fn schedule_length(&self) -> usize {
    self.regions.iter().map(|r| r.bundles.len()).sum()
  }

  fn clear_schedule(&mut self) {
    for r in self.regions.iter_mut() {
      r.bundles.clear();
    }
  }
}

impl fmt::Debug for BlockState {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(
      fmt,
      "{:?} regions={} scheduled={} lm={} rm={}",
      self.kind,
      self.regions.len(),
      self.fixpoint.scheduled,
      self.fixpoint.latency_margin,
      self.fixpoint.resource_margin
    )
  }
}

/// Split a block after each region-ending instruction.  A block always has
/// at least one region, possibly empty.
fn split_regions<F: Function>(func: &F, b: BlockIx) -> Vec<Region> {
  let mut regions = vec![];
  let mut cur = vec![];
  for iix in func.block_insns(b) {
    cur.push(iix);
    if func.is_region_end(func.get_insn(iix)) {
      regions.push(Region::new(std::mem::replace(&mut cur, vec![])));
    }
  }
  if !cur.is_empty() || regions.is_empty() {
    regions.push(Region::new(cur));
  }
  regions
}

// Non-meta members first, then the meta ones.
fn bundle_members(bundle: &Bundle<InstIx>) -> Vec<InstIx> {
  let mut v: Vec<InstIx> = bundle.instrs().into_iter().map(|(i, _)| i).collect();
  v.extend(bundle.meta_instrs().cloned());
  v
}

//=============================================================================
// Scoreboard helpers for overlaying the end of one schedule onto the start of
// another.

/// Emit the last bundles of |bundles|, at most a conflict horizon's worth,
/// advancing after each one.  The result shows what sticks out after them.
pub fn emit_bundles_top_down(
  hr: &HazardRecognizer, bundles: &[Bundle<InstIx>],
) -> ResourceScoreboard<FuncUnitCycle> {
  let mut sb = hr.new_scoreboard();
  let total = bundles.len();
  let amount = total.min(hr.conflict_horizon() as usize);
  for bundle in &bundles[total - amount..] {
    hr.emit_bundle(&mut sb, bundle, 0);
    sb.advance();
  }
  sb
}

/// A scoreboard holding |bundles| at cycles 1, 2, ...  If there are fewer
/// bundles than the conflict horizon, the cycles after them are unknown and
/// are blocked.
pub fn create_bottom_up_scoreboard(
  hr: &HazardRecognizer, bundles: &[Bundle<InstIx>],
) -> ResourceScoreboard<FuncUnitCycle> {
  let mut sb = hr.new_scoreboard();
  let required = hr.conflict_horizon() as usize;
  let num = bundles.len();
  if num < required {
    for _ in 0..required - num {
      hr.block_cycle(&mut sb, 0);
      sb.recede();
    }
  }
  for bundle in bundles[..num.min(required)].iter().rev() {
    hr.emit_bundle(&mut sb, bundle, 0);
    sb.recede();
  }
  sb
}

/// Replay |pred_bundles| bottom-up against |sb|, the last one at cycle 0.
/// Returns the first instruction that conflicts.
pub fn check_resource_conflicts(
  hr: &HazardRecognizer, sb: &ResourceScoreboard<FuncUnitCycle>,
  pred_bundles: &[Bundle<InstIx>],
) -> Option<InstIx> {
  trace!("successor scoreboard:");
  sb.dump();
  for (cycle, bundle) in pred_bundles.iter().rev().enumerate() {
    if cycle as i32 >= hr.conflict_horizon() {
      break;
    }
    let instrs = bundle.instrs();
    for ((iix, _), (opcode, slots)) in instrs.iter().zip(bundle.issue_slots()) {
      if hr.check_conflict(sb, opcode, slots, -(cycle as i32)) {
        return Some(*iix);
      }
    }
  }
  None
}

/// Check the latencies of the edges across |graph|'s boundary, with |bottom|
/// scheduled right before |top|.  On success, returns how far latencies
/// stick out of |bottom|.  On failure, returns the producer of a violated
/// edge.
fn check_latencies(
  hr: &HazardRecognizer, graph: &DataDependenceGraph,
  top: &[Bundle<InstIx>], bottom: &[Bundle<InstIx>],
) -> Result<i32, InstIx> {
  let horizon = hr.conflict_horizon();
  let mut top_depth = Map::<InstIx, i32>::default();
  for (depth, bundle) in top.iter().enumerate() {
    if depth as i32 > horizon {
      break;
    }
    for iix in bundle_members(bundle) {
      top_depth.insert(iix, depth as i32);
    }
  }

  let mut max_extent = 0;
  let mut height = 1;
  for bundle in bottom.iter().rev() {
    for iix in bundle_members(bundle) {
      let pred = match graph.pre_boundary_node(iix) {
        Some(n) => n,
        None => continue,
      };
      let extending = graph.max_latency(pred) - height;
      if extending <= 0 {
        continue;
      }
      max_extent = max_extent.max(extending);
      for edge in graph.post_boundary_succs(pred) {
        let depth = match top_depth.get(&graph.inst(edge.node)) {
          Some(d) => *d,
          // Over the horizon.
          None => continue,
        };
        if height + depth < edge.latency {
          debug!(
            "latency {:?} -> {:?} = {} not met ({})",
            iix,
            graph.inst(edge.node),
            edge.latency,
            height + depth
          );
          return Err(iix);
        }
      }
    }
    height += 1;
    if height > horizon {
      break;
    }
  }
  Ok(max_extent)
}

//=============================================================================
// The coordinator.

pub struct InterBlockScheduling<'a> {
  hr: HazardRecognizer<'a>,
  opts: SchedOptions,
  blocks: TypedIxVec<BlockIx, BlockState>,
  order: Vec<BlockIx>,
  next_in_order: usize,
  current: Option<BlockIx>,
}

impl<'a> InterBlockScheduling<'a> {
  pub fn new(
    catalog: &'a dyn SlotCatalog, model: &'a dyn SchedModel,
    opts: &SchedOptions,
  ) -> Self {
    Self {
      hr: HazardRecognizer::new(catalog, model),
      opts: opts.clone(),
      blocks: TypedIxVec::new(),
      order: vec![],
      next_in_order: 0,
      current: None,
    }
  }

  pub fn hazard_recognizer(&self) -> &HazardRecognizer<'a> {
    &self.hr
  }

  pub fn block(&self, b: BlockIx) -> &BlockState {
    &self.blocks[b]
  }

  /// Set up the state of every block, classify the blocks and decide the
  /// scheduling order.
  #[inline(never)]
  pub fn enter_function<F: Function>(&mut self, func: &F, cfg: &CFGInfo) {
    self.blocks = TypedIxVec::new();
    for b in func.blocks() {
      self.blocks.push(BlockState::new(func, cfg, b));
    }
    if self.opts.loop_aware {
      self.classify(func, cfg);
    }
    self.define_scheduling_order(func, cfg);
  }

  fn classify<F: Function>(&mut self, func: &F, cfg: &CFGInfo) {
    let is_loop = |b: BlockIx| {
      let succs = cfg.succs(b);
      let loop_edges = succs.iter().filter(|s| **s == b).count();
      loop_edges == 1 && succs.len() - loop_edges == 1
    };
    for b in func.blocks() {
      // The epilogue must be a dedicated exit, or the fallthrough block.
      let can_fix = |s: BlockIx| {
        s == b
          || cfg.preds(s).len() == 1
          || (cfg.is_layout_successor(b, s) && !is_loop(s))
      };
      if is_loop(b) && cfg.succs(b).iter().all(|s| can_fix(*s)) {
        self.blocks[b].kind = BlockType::Loop;
      }
    }
    for b in func.blocks() {
      if self.blocks[b].kind != BlockType::Loop {
        continue;
      }
      for s in cfg.unique_succs(b) {
        if s != b {
          self.blocks[s].kind = BlockType::Epilogue;
          self.blocks[s].loop_pred = Some(b);
        }
      }
    }
  }

  fn define_scheduling_order<F: Function>(&mut self, func: &F, cfg: &CFGInfo) {
    // Loops go first, so that they aren't constrained by their epilogues.
    self.order = func
      .blocks()
      .into_iter()
      .filter(|b| self.blocks[*b].kind == BlockType::Loop)
      .collect();
    // Then the rest, successors before predecessors.
    for b in cfg.post_ord.iter() {
      if self.blocks[*b].kind != BlockType::Loop {
        self.order.push(*b);
      }
    }
    assert!(self.order.len() == func.blocks().len());
    self.next_in_order = 0;
    info!("scheduling order: {:?}", self.order);
    for b in func.blocks() {
      if self.blocks[b].kind != BlockType::Regular {
        info!("  {:?} is {:?}", b, self.blocks[b].kind);
      }
    }
  }

  /// The block to schedule next.  A loop is returned again until it has
  /// converged.
  pub fn next_block(&mut self) -> Option<BlockIx> {
    while self.next_in_order < self.order.len() {
      let b = self.order[self.next_in_order];
      if !self.blocks[b].is_scheduled() {
        return Some(b);
      }
      self.next_in_order += 1;
    }
    None
  }

  pub fn enter_block(&mut self, b: BlockIx) {
    let bs = &mut self.blocks[b];
    bs.clear_schedule();
    debug!(">> enter {:?}: {:?}", b, bs);
    self.current = Some(b);
  }

  pub fn set_region_bundles(
    &mut self, b: BlockIx, region: usize, bundles: Vec<Bundle<InstIx>>,
  ) {
    debug_assert!(self.current == Some(b));
    let r = &mut self.blocks[b].regions[region];
    debug_assert!(r.bundles.is_empty());
    r.bundles = bundles;
  }

  pub fn successors_are_scheduled(&self, b: BlockIx) -> bool {
    self.blocks[b].succs.iter().all(|s| self.blocks[*s].is_scheduled())
  }

  /// The assumed latency at the end of a loop.
  pub fn latency_cap(&self, b: BlockIx) -> Option<u32> {
    let bs = &self.blocks[b];
    if bs.kind != BlockType::Loop {
      return None;
    }
    Some(bs.fixpoint.latency_margin as u32)
  }

  /// The number of tail cycles, counted back from the pipeline depth, that a
  /// loop's schedule must keep free.
  pub fn blocked_resource_cap(&self, b: BlockIx) -> Option<u32> {
    let bs = &self.blocks[b];
    if bs.kind != BlockType::Loop {
      return None;
    }
    Some(bs.fixpoint.resource_margin as u32)
  }

  fn is_bottom_region(&self, b: BlockIx, region: usize) -> bool {
    region + 1 == self.blocks[b].regions.len()
  }

  /// Empty cycles at the start of |region|.
  pub fn first_cycle(&self, b: BlockIx, region: usize) -> u32 {
    if region == 0 && !self.opts.epilogue_analysis {
      self.num_entry_nops(b)
    } else {
      0
    }
  }

  /// The minimum distance between each instruction of |region| and the
  /// region's end.
  pub fn exit_latencies<F: Function>(
    &self, func: &F, b: BlockIx, region: usize,
  ) -> Vec<u32> {
    let bs = &self.blocks[b];
    let bottom = self.is_bottom_region(b, region);
    let interblock = bottom && self.successors_are_scheduled(b);
    bs.regions[region]
      .insns
      .iter()
      .map(|iix| {
        let lat = self.hr.max_latency_of(func.opcode(func.get_insn(*iix)));
        if !bottom {
          return lat;
        }
        if let Some(cap) = self.latency_cap(b) {
          return lat.min(cap);
        }
        if let Some(margin) = self.opts.latency_margin {
          return margin;
        }
        if !interblock {
          return lat;
        }
        // Find the earliest reference in any successor.
        let mut earliest = lat;
        for s in bs.succs.iter() {
          let top = self.blocks[*s].top_bundles();
          earliest = earliest_ref(func, *iix, top, earliest);
        }
        (lat as i32 - earliest as i32).max(1) as u32
      })
      .collect()
  }

  /// The resources assumed to be busy after |region|'s end.
  pub fn tail_scoreboard(
    &self, b: BlockIx, region: usize,
  ) -> ResourceScoreboard<FuncUnitCycle> {
    let bs = &self.blocks[b];
    let bottom = self.is_bottom_region(b, region);
    let depth = self.hr.pipeline_depth();
    let mut first_blocked = 0;
    let mut tops = vec![];
    if bottom
      && self.opts.interblock_scoreboard
      && self.successors_are_scheduled(b)
    {
      first_blocked = depth;
      for s in bs.succs.iter() {
        let top = self.blocks[*s].top_bundles();
        first_blocked = first_blocked.min(top.len() as u32);
        tops.push(top);
      }
    }
    if bottom {
      if let Some(cap) = self.blocked_resource_cap(b) {
        first_blocked = first_blocked.max(depth.saturating_sub(cap));
      }
    }
    trace!("{:?} region {}: first blocked cycle {}", b, region, first_blocked);
    tail_scoreboard(&self.hr, &tops, first_blocked)
  }

  /// The number of no-op cycles at the start of an epilogue.  Only valid
  /// once its loop has converged.
  pub fn num_entry_nops(&self, b: BlockIx) -> u32 {
    let bs = &self.blocks[b];
    if bs.kind != BlockType::Epilogue {
      return 0;
    }
    let lp = match bs.loop_pred {
      Some(lp) => lp,
      None => panic!("num_entry_nops: epilogue {:?} without a loop", b),
    };
    self.safety_margin(lp) as u32
  }

  pub fn safety_margin(&self, b: BlockIx) -> i32 {
    self.blocks[b].safety_margin()
  }

  /// Finish a pass over |b|.  Loops check convergence here; every other
  /// block is done after one pass.
  #[inline(never)]
  pub fn leave_block<F: Function>(
    &mut self, func: &F, b: BlockIx,
  ) -> ConvergenceResult {
    debug!("<< leave {:?}", b);
    self.current = None;
    let res = match self.blocks[b].kind {
      BlockType::Loop => self.update_fixpoint(func, b),
      BlockType::Epilogue => {
        let nops = if self.opts.epilogue_analysis {
          let nops = self.epilogue_nops(func, b);
          let first = &mut self.blocks[b].regions[0].bundles;
          for _ in 0..nops {
            first.insert(0, Bundle::new());
          }
          nops
        } else {
          self.num_entry_nops(b)
        };
        info!("{:?}: {} entry nops", b, nops);
        self.blocks[b].entry_nops = nops;
        ConvergenceResult::Converged
      }
      BlockType::Regular => ConvergenceResult::Converged,
    };
    if res == ConvergenceResult::Converged {
      self.blocks[b].fixpoint.scheduled = true;
    }
    res
  }

  fn update_fixpoint<F: Function>(
    &mut self, func: &F, b: BlockIx,
  ) -> ConvergenceResult {
    let hr = &self.hr;
    let bs = &mut self.blocks[b];
    if bs.boundary_graph.is_none() {
      // Bottom, then the top of the next iteration.
      let mut graph = DataDependenceGraph::new();
      for iix in bs.bottom().insns() {
        graph.add_node(func, hr.model(), *iix);
      }
      graph.mark_boundary();
      for iix in bs.top().insns() {
        graph.add_node(func, hr.model(), *iix);
      }
      graph.build_edges();
      bs.boundary_graph = Some(graph);
    }
    let graph = match &bs.boundary_graph {
      Some(g) => g,
      None => unreachable!(),
    };

    let regions = &bs.regions;
    let top = regions[0].bundles.as_slice();
    let bottom = regions[regions.len() - 1].bundles.as_slice();
    let fp = &mut bs.fixpoint;
    match check_latencies(hr, graph, top, bottom) {
      Ok(extent) => fp.max_latency_extent = extent,
      Err(iix) => {
        fp.latency_margin += 1;
        fp.iterations += 1;
        debug!(
          "{:?} not converged: latency of {:?}, lm={} rm={}",
          b, iix, fp.latency_margin, fp.resource_margin
        );
        return Self::retry_or_fail(hr, fp);
      }
    }

    let sb = create_bottom_up_scoreboard(hr, top);
    if let Some(iix) = check_resource_conflicts(hr, &sb, bottom) {
      fp.resource_margin += 1;
      fp.iterations += 1;
      debug!(
        "{:?} not converged: resources of {:?}, lm={} rm={}",
        b, iix, fp.latency_margin, fp.resource_margin
      );
      return Self::retry_or_fail(hr, fp);
    }
    fp.max_resource_extent = emit_bundles_top_down(hr, bottom).last_occupied();

    info!(
      "{:?} converged after {} retries: latency extent {}, resource extent {}",
      b, fp.iterations, fp.max_latency_extent, fp.max_resource_extent
    );
    ConvergenceResult::Converged
  }

  fn retry_or_fail(
    hr: &HazardRecognizer, fp: &FixedpointState,
  ) -> ConvergenceResult {
    // Both margins at their maximum always converge, so anything beyond
    // that is a bug.
    if fp.iterations > 2 * hr.conflict_horizon() as u32 {
      return ConvergenceResult::Fatal;
    }
    ConvergenceResult::RetryWithMargins {
      latency: fp.latency_margin,
      resource: fp.resource_margin,
    }
  }

  /// The no-op cycles an epilogue needs, derived from the actual schedules
  /// of the loop and the epilogue.  An empty epilogue gets the loop's full
  /// safety margin.
  fn epilogue_nops<F: Function>(&self, func: &F, epilogue: BlockIx) -> u32 {
    let es = &self.blocks[epilogue];
    let lp = match es.loop_pred {
      Some(lp) => lp,
      None => panic!("epilogue_nops: epilogue {:?} without a loop", epilogue),
    };
    let ls = &self.blocks[lp];
    if func.block_insns(epilogue).is_empty() {
      return ls.safety_margin() as u32;
    }
    let timing = cycles_to_respect_timing(func, &self.hr, ls.bottom(), es.top());
    cycles_to_avoid_resource_conflicts(
      &self.hr,
      timing,
      es.top_bundles(),
      ls.bottom().bundles(),
    )
  }

  pub fn leave_function(&mut self) {
    self.blocks = TypedIxVec::new();
    self.order.clear();
    self.next_in_order = 0;
    self.current = None;
  }
}

/// The first cycle of |bundles| holding an instruction that depends on
/// |src|, or the number of bundles if there is none.  Stops at |prune|.
fn earliest_ref<F: Function>(
  func: &F, src: InstIx, bundles: &[Bundle<InstIx>], prune: u32,
) -> u32 {
  let mut cycle = 0;
  for bundle in bundles {
    if cycle >= prune {
      return cycle;
    }
    if bundle_members(bundle).iter().any(|dst| depends(func, src, *dst)) {
      return cycle;
    }
    cycle += 1;
  }
  cycle
}

/// No-op cycles needed between |bottom| of a loop and |top| of its epilogue
/// to meet the latencies across the boundary.
fn cycles_to_respect_timing<F: Function>(
  func: &F, hr: &HazardRecognizer, bottom: &Region, top: &Region,
) -> u32 {
  let mut graph = DataDependenceGraph::new();
  for iix in bottom.insns() {
    graph.add_node(func, hr.model(), *iix);
  }
  graph.mark_boundary();
  for iix in top.insns() {
    graph.add_node(func, hr.model(), *iix);
  }
  graph.build_edges();

  // Distance of every instruction from the start of |bottom|.
  let mut dist = Map::<InstIx, i32>::default();
  let mut d = 0;
  for bundle in bottom.bundles().iter().chain(top.bundles().iter()) {
    for iix in bundle_members(bundle) {
      dist.insert(iix, d);
    }
    d += 1;
  }
  let total = d;

  let mut nops = 0;
  let mut height = 1;
  for bundle in bottom.bundles().iter().rev() {
    for iix in bundle_members(bundle) {
      let pred = match graph.pre_boundary_node(iix) {
        Some(n) => n,
        None => continue,
      };
      let from = dist[&iix];
      for edge in graph.post_boundary_succs(pred) {
        if let Some(to) = dist.get(&graph.inst(edge.node)) {
          nops = nops.max(edge.latency - (to - from));
        }
      }
      // Anything still in flight must be done by the end of |top|.
      nops = nops.max(graph.max_latency(pred) - (total - from));
    }
    height += 1;
    if height > hr.conflict_horizon() {
      break;
    }
  }
  debug!("loop/epilogue timing requires {} nops", nops);
  nops as u32
}

/// Starting from |existing| no-op cycles, add more until |loop_bottom| and
/// |epilogue_top| don't collide.
fn cycles_to_avoid_resource_conflicts(
  hr: &HazardRecognizer, existing: u32, epilogue_top: &[Bundle<InstIx>],
  loop_bottom: &[Bundle<InstIx>],
) -> u32 {
  let mut sb = create_bottom_up_scoreboard(hr, epilogue_top);
  let mut nops = 0;
  while nops < existing {
    sb.recede();
    nops += 1;
  }
  while check_resource_conflicts(hr, &sb, loop_bottom).is_some() {
    sb.recede();
    nops += 1;
  }
  debug!("loop/epilogue resources require {} nops", nops);
  nops
}

#[cfg(test)]
pub(crate) mod test {
  use super::*;
  use crate::bundle::test::*;
  use crate::data_structures::{Opcode, Range, Reg};
  use crate::hazard::{InstrStage, Itinerary};
  use crate::interface::{InstRegUses, MemAccess};
  use smallvec::smallvec;

  pub(crate) struct Model {
    alu: Itinerary,
    lng: Itinerary,
    call: Itinerary,
    none: Itinerary,
  }

  impl Model {
    pub(crate) fn new() -> Self {
      Self {
        alu: Itinerary::new(&[InstrStage::new(1, 1)], 1),
        lng: Itinerary::new(&[InstrStage::new(3, 4)], 3),
        call: Itinerary::new(&[], 3),
        none: Itinerary::default(),
      }
    }
  }

  impl SchedModel for Model {
    fn itinerary(&self, opcode: Opcode) -> &Itinerary {
      match opcode {
        ALU_OP => &self.alu,
        LNG_OP => &self.lng,
        CALL_OP => &self.call,
        _ => &self.none,
      }
    }
    fn pipeline_depth(&self) -> u32 {
      3
    }
    fn max_latency(&self) -> u32 {
      3
    }
  }

  // Blocks of (opcode) instructions with explicit successors.  The
  // |carried| opcodes read and write r0.
  pub(crate) struct Cfg {
    pub insns: Vec<Opcode>,
    pub blocks: Vec<(u32, u32, Vec<u32>)>,
    pub carried: Vec<Opcode>,
  }

  impl Function for Cfg {
    type Inst = Opcode;
    fn insns(&self) -> &[Opcode] {
      &self.insns
    }
    fn blocks(&self) -> Range<BlockIx> {
      Range::new(BlockIx::new(0), self.blocks.len())
    }
    fn entry_block(&self) -> BlockIx {
      BlockIx::new(0)
    }
    fn block_insns(&self, block: BlockIx) -> Range<InstIx> {
      let (start, len, _) = &self.blocks[block.get() as usize];
      Range::new(InstIx::new(*start), *len as usize)
    }
    fn block_succs(&self, block: BlockIx) -> Vec<BlockIx> {
      self.blocks[block.get() as usize].2.iter().map(|s| BlockIx::new(*s)).collect()
    }
    fn opcode(&self, insn: &Opcode) -> Opcode {
      *insn
    }
    fn get_regs(&self, insn: &Opcode) -> InstRegUses {
      let mut regs = InstRegUses { used: smallvec![], defined: smallvec![] };
      if self.carried.contains(insn) {
        regs.used.push(Reg::new(0));
        regs.defined.push(Reg::new(0));
      }
      regs
    }
    fn mem_access(&self, _insn: &Opcode) -> MemAccess {
      MemAccess::None
    }
    fn is_region_end(&self, insn: &Opcode) -> bool {
      *insn == CALL_OP
    }
    fn is_alignment_boundary(&self, insn: &Opcode) -> bool {
      *insn == CALL_OP
    }
    fn gen_nop(&self, opcode: Opcode) -> Opcode {
      opcode
    }
  }

  // b0 -> b1; b1 -> {b1, b2}; b2 -> b3; b3 exits.
  fn loop_cfg() -> Cfg {
    Cfg {
      insns: vec![ALU_OP, ALU_OP, CALL_OP, ALU_OP, ALU_OP],
      blocks: vec![
        (0, 1, vec![1]),
        (1, 2, vec![1, 2]),
        (3, 1, vec![3]),
        (4, 1, vec![]),
      ],
      carried: vec![],
    }
  }

  fn bundle_of(cat: &TinyCatalog, ops: &[Opcode]) -> Bundle<InstIx> {
    let mut b = Bundle::new();
    for (i, op) in ops.iter().enumerate() {
      b.add(cat, InstIx::new(i as u32), *op);
    }
    b
  }

  #[test]
  fn classification_and_order() {
    let cat = TinyCatalog::new();
    let model = Model::new();
    let f = loop_cfg();
    let cfg = CFGInfo::create(&f).unwrap();
    let mut ibs = InterBlockScheduling::new(&cat, &model, &SchedOptions::default());
    ibs.enter_function(&f, &cfg);
    assert_eq!(ibs.block(BlockIx::new(1)).kind, BlockType::Loop);
    assert_eq!(ibs.block(BlockIx::new(2)).kind, BlockType::Epilogue);
    assert_eq!(ibs.block(BlockIx::new(2)).loop_predecessor(), Some(BlockIx::new(1)));
    assert_eq!(ibs.block(BlockIx::new(0)).kind, BlockType::Regular);
    // The loop's call closes its only region.
    assert_eq!(ibs.block(BlockIx::new(1)).regions().len(), 1);
    assert_eq!(ibs.next_block(), Some(BlockIx::new(1)));
    // Successors before predecessors after the loop.
    assert_eq!(ibs.order, vec![1, 3, 2, 0].into_iter().map(BlockIx::new).collect::<Vec<_>>());

    let opts = SchedOptions { loop_aware: false, ..SchedOptions::default() };
    let mut plain = InterBlockScheduling::new(&cat, &model, &opts);
    plain.enter_function(&f, &cfg);
    assert_eq!(plain.block(BlockIx::new(1)).kind, BlockType::Regular);
    assert_eq!(plain.block(BlockIx::new(2)).kind, BlockType::Regular);
  }

  #[test]
  fn safety_margin_gives_entry_nops() {
    let cat = TinyCatalog::new();
    let model = Model::new();
    let f = loop_cfg();
    let cfg = CFGInfo::create(&f).unwrap();
    let mut ibs = InterBlockScheduling::new(&cat, &model, &SchedOptions::default());
    ibs.enter_function(&f, &cfg);
    let (lp, epi) = (BlockIx::new(1), BlockIx::new(2));
    {
      let fp = &mut ibs.blocks[lp].fixpoint;
      fp.scheduled = true;
      fp.max_latency_extent = 2;
      fp.max_resource_extent = 1;
    }
    assert_eq!(ibs.safety_margin(lp), 2);
    assert_eq!(ibs.num_entry_nops(epi), 2);
    assert_eq!(ibs.first_cycle(epi, 0), 2);
    assert_eq!(ibs.num_entry_nops(BlockIx::new(0)), 0);
    ibs.enter_block(epi);
    ibs.set_region_bundles(epi, 0, vec![Bundle::new(), Bundle::new()]);
    assert_eq!(ibs.leave_block(&f, epi), ConvergenceResult::Converged);
    assert_eq!(ibs.block(epi).entry_nops(), 2);
    assert!(ibs.block(epi).is_scheduled());
  }

  #[test]
  fn backedge_resource_overlay() {
    let cat = TinyCatalog::new();
    let model = Model::new();
    let hr = HazardRecognizer::new(&cat, &model);
    assert_eq!(hr.conflict_horizon(), 3);
    let top = vec![bundle_of(&cat, &[ALU_OP])];
    let sb = create_bottom_up_scoreboard(&hr, &top);
    // The long op is busy for three cycles, which reaches the blocked cycles
    // after the one known top bundle.
    let bottom = vec![bundle_of(&cat, &[LNG_OP])];
    assert_eq!(check_resource_conflicts(&hr, &sb, &bottom), Some(InstIx::new(0)));
    assert_eq!(emit_bundles_top_down(&hr, &bottom).last_occupied(), 2);
    // Issued two cycles earlier, it is done in time.
    let bottom = vec![bundle_of(&cat, &[LNG_OP]), Bundle::new(), Bundle::new()];
    assert_eq!(check_resource_conflicts(&hr, &sb, &bottom), None);
    assert_eq!(emit_bundles_top_down(&hr, &bottom).last_occupied(), 0);
  }

  #[test]
  fn retries_are_bounded() {
    let cat = TinyCatalog::new();
    let model = Model::new();
    let hr = HazardRecognizer::new(&cat, &model);
    let mut fp = FixedpointState::default();
    fp.iterations = 6;
    fp.latency_margin = 3;
    assert_eq!(
      InterBlockScheduling::retry_or_fail(&hr, &fp),
      ConvergenceResult::RetryWithMargins { latency: 3, resource: 0 }
    );
    fp.iterations = 7;
    assert_eq!(InterBlockScheduling::retry_or_fail(&hr, &fp), ConvergenceResult::Fatal);
  }
}
