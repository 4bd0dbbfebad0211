/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A top-down, cycle-driven list scheduler for one scheduling region.
//!
//! The region is a contiguous run of instructions of one block.  If its last
//! instruction closes the region (a terminator or a call), that instruction
//! is placed in the region's last cycle.  The region's length is chosen as
//! the smallest one for which every instruction's exit latency is respected
//! and the stages still in flight at the end don't collide with the tail
//! scoreboard, i.e. with whatever is known to issue after the region.

use log::{debug, trace};

use crate::bundle::Bundle;
use crate::data_structures::{slot_bit, BlockIx, InstIx, Opcode, SlotBits};
use crate::dependence::{DataDependenceGraph, NodeIx};
use crate::hazard::HazardRecognizer;
use crate::interface::{Function, SchedError};
use crate::scoreboard::{FuncUnitCycle, ResourceScoreboard};

/// Everything the scheduler needs to know about one region.
pub struct RegionRequest<'r> {
  pub block: BlockIx,
  /// The instructions, in their original order.
  pub insns: &'r [InstIx],
  /// Number of empty cycles before the first instruction may issue.
  pub first_cycle: u32,
  /// Minimum distance from each instruction to the end of the region,
  /// parallel to |insns|.
  pub exit_latencies: &'r [u32],
  /// Resources in use after the region.  Coordinate 0 is the region's last
  /// cycle.
  pub tail: &'r ResourceScoreboard<FuncUnitCycle>,
}

// Per-instruction scheduling state.
struct SchedUnit {
  opcode: Opcode,
  meta: bool,
  height: u32,
  cycle: Option<u32>,
}

/// Build the tail scoreboard of a region: the first |first_blocked| cycles
/// of the successors' top bundles replayed after the region's end, and the
/// cycles after them blocked up to the pipeline depth.
pub fn tail_scoreboard(
  hr: &HazardRecognizer, successor_tops: &[&[Bundle<InstIx>]],
  first_blocked: u32,
) -> ResourceScoreboard<FuncUnitCycle> {
  let mut sb = hr.new_scoreboard();
  for top in successor_tops {
    for (c, bundle) in top.iter().enumerate().take(first_blocked as usize) {
      hr.emit_bundle(&mut sb, bundle, c as i32 + 1);
    }
  }
  for c in first_blocked + 1..=hr.pipeline_depth() {
    hr.block_cycle(&mut sb, c as i32);
  }
  sb
}

/// A scoreboard holding |bundles| such that the bundle at index |last| is at
/// coordinate 0.  Only the bundles whose stages can reach coordinate 0 are
/// emitted.
fn replay_up_to(
  hr: &HazardRecognizer, bundles: &[Bundle<InstIx>], last: usize,
) -> ResourceScoreboard<FuncUnitCycle> {
  let mut sb = hr.new_scoreboard();
  for (k, bundle) in bundles.iter().enumerate().take(last + 1) {
    let delta = k as i32 - last as i32;
    if -delta < hr.conflict_horizon() {
      hr.emit_bundle(&mut sb, bundle, delta);
    }
  }
  sb
}

/// Do the stages of |bundles| collide with |tail| if the last bundle is at
/// coordinate 0?
pub fn conflicts_with_tail(
  hr: &HazardRecognizer, bundles: &[Bundle<InstIx>],
  tail: &ResourceScoreboard<FuncUnitCycle>,
) -> bool {
  let n = bundles.len() as i32;
  for (k, bundle) in bundles.iter().enumerate().rev() {
    let delta = k as i32 - (n - 1);
    if -delta >= hr.conflict_horizon() {
      break;
    }
    for (opcode, slots) in bundle.issue_slots() {
      if hr.check_conflict(tail, opcode, slots, delta) {
        trace!("tail conflict: {:?} at {}", opcode, delta);
        return true;
      }
    }
  }
  false
}

fn issue_bits(
  hr: &HazardRecognizer, bundle: &Bundle<InstIx>,
  opcode: Opcode,
) -> SlotBits {
  match bundle.find_slot(hr.catalog(), opcode) {
    Some(slot) => slot_bit(slot),
    None => 0,
  }
}

/// Schedule one region.  Returns one bundle per cycle, leading empty cycles
/// included.
#[inline(never)]
pub fn schedule_region<F: Function>(
  func: &F, hr: &HazardRecognizer, req: &RegionRequest,
) -> Result<Vec<Bundle<InstIx>>, SchedError> {
  debug_assert!(req.insns.len() == req.exit_latencies.len());
  let catalog = hr.catalog();

  let mut ddg = DataDependenceGraph::new();
  for iix in req.insns {
    ddg.add_node(func, hr.model(), *iix);
  }
  ddg.build_edges();

  let num = req.insns.len();
  let ending = match req.insns.last() {
    Some(iix) if func.is_region_end(func.get_insn(*iix)) => Some(num - 1),
    _ => None,
  };

  // Critical-path heights, computed bottom-up.  Edges only go forward, so a
  // reverse walk sees every successor first.
  let mut units: Vec<SchedUnit> = req
    .insns
    .iter()
    .map(|iix| {
      let opcode = func.opcode(func.get_insn(*iix));
      SchedUnit { opcode, meta: catalog.is_meta(opcode), height: 0, cycle: None }
    })
    .collect();
  for i in (0..num).rev() {
    let mut height = req.exit_latencies[i];
    for e in ddg.succs(NodeIx::new(i as u32)) {
      height = height.max(e.latency.max(0) as u32 + units[e.node.get()].height);
    }
    units[i].height = height;
  }

  let mut bundles: Vec<Bundle<InstIx>> = Vec::new();
  for _ in 0..req.first_cycle {
    bundles.push(Bundle::new());
  }

  let body = ending.unwrap_or(num);
  let mut remaining = body;
  let mut sb = hr.new_scoreboard();
  let mut cycle = req.first_cycle;
  let mut idle = 0;
  let stall_limit = (hr.max_look_ahead() + hr.max_latency() as i32) as u32;

  while remaining > 0 {
    let mut bundle = Bundle::new();
    loop {
      // Candidates, best first.  Recomputed after every placement since a
      // zero-latency edge may make a successor ready in this cycle.
      let mut cands: Vec<usize> = (0..body)
        .filter(|i| units[*i].cycle.is_none())
        .filter(|i| {
          ddg.preds(NodeIx::new(*i as u32)).iter().all(|e| {
            match units[e.node.get()].cycle {
              Some(c) => c as i32 + e.latency <= cycle as i32,
              None => false,
            }
          })
        })
        .collect();
      cands.sort_by(|a, b| units[*b].height.cmp(&units[*a].height).then(a.cmp(b)));

      let mut placed = None;
      for i in cands {
        let opcode = units[i].opcode;
        if units[i].meta {
          placed = Some(i);
          break;
        }
        if !bundle.can_add(catalog, opcode) {
          continue;
        }
        let bits = issue_bits(hr, &bundle, opcode);
        if hr.check_conflict(&sb, opcode, bits, 0) {
          continue;
        }
        hr.emit_in_scoreboard(&mut sb, opcode, bits, 0);
        placed = Some(i);
        break;
      }
      match placed {
        Some(i) => {
          bundle.add(catalog, req.insns[i], units[i].opcode);
          units[i].cycle = Some(cycle);
          remaining -= 1;
          idle = 0;
        }
        None => break,
      }
    }
    trace!("cycle {}: {:?}", cycle, bundle.opcodes());
    bundles.push(bundle);
    sb.advance();
    cycle += 1;
    idle += 1;
    if idle > stall_limit {
      debug!("region in {:?} stalled at cycle {}", req.block, cycle);
      return Err(SchedError::RegionOverflow { block: req.block });
    }
  }

  // Lower bound on the region length.
  let mut lower = bundles.len().max(req.first_cycle as usize);
  for i in 0..body {
    if let Some(c) = units[i].cycle {
      lower = lower.max(c as usize + req.exit_latencies[i] as usize);
    }
  }
  if let Some(e) = ending {
    let mut ready = req.first_cycle as i32;
    for p in ddg.preds(NodeIx::new(e as u32)) {
      if let Some(c) = units[p.node.get()].cycle {
        ready = ready.max(c as i32 + p.latency);
      }
    }
    lower = lower.max(ready as usize + 1);
  }

  let bound = lower + hr.max_look_ahead() as usize + 1;
  for n in lower..=bound {
    if n == 0 {
      return Ok(vec![]);
    }
    let mut trial = bundles.clone();
    trial.resize_with(n, Bundle::new);
    if let Some(e) = ending {
      let opcode = units[e].opcode;
      let last = &trial[n - 1];
      if !units[e].meta {
        if !last.can_add(catalog, opcode) {
          continue;
        }
        let bits = issue_bits(hr, last, opcode);
        let sb = replay_up_to(hr, &trial, n - 1);
        if hr.check_conflict(&sb, opcode, bits, 0) {
          continue;
        }
      }
      trial[n - 1].add(catalog, req.insns[e], opcode);
    }
    if conflicts_with_tail(hr, &trial, req.tail) {
      continue;
    }
    debug!(
      "region of {:?}: {} insns in {} cycles (lower bound {})",
      req.block, num, n, lower
    );
    return Ok(trial);
  }
  Err(SchedError::RegionOverflow { block: req.block })
}

#[cfg(test)]
pub(crate) mod test {
  use super::*;
  use crate::bundle::test::*;
  use crate::data_structures::{Range, Reg};
  use crate::hazard::{InstrStage, Itinerary};
  use crate::interface::{InstRegUses, MemAccess, SchedModel};
  use smallvec::smallvec;

  pub(crate) struct Model {
    alu: Itinerary,
    ld: Itinerary,
    none: Itinerary,
  }

  impl Model {
    pub(crate) fn new() -> Self {
      Self {
        alu: Itinerary::new(&[InstrStage::new(1, 1)], 1),
        ld: Itinerary::new(&[InstrStage::new(1, 2)], 3),
        none: Itinerary::default(),
      }
    }
  }

  impl SchedModel for Model {
    fn itinerary(&self, opcode: Opcode) -> &Itinerary {
      match opcode {
        ALU_OP => &self.alu,
        LD_OP => &self.ld,
        _ => &self.none,
      }
    }
    fn pipeline_depth(&self) -> u32 {
      1
    }
    fn max_latency(&self) -> u32 {
      3
    }
  }

  // (opcode, def, use)
  pub(crate) struct Straight(pub Vec<(Opcode, Option<u32>, Option<u32>)>);

  impl Function for Straight {
    type Inst = (Opcode, Option<u32>, Option<u32>);
    fn insns(&self) -> &[Self::Inst] {
      &self.0
    }
    fn blocks(&self) -> Range<BlockIx> {
      Range::new(BlockIx::new(0), 1)
    }
    fn entry_block(&self) -> BlockIx {
      BlockIx::new(0)
    }
    fn block_insns(&self, _block: BlockIx) -> Range<InstIx> {
      Range::new(InstIx::new(0), self.0.len())
    }
    fn block_succs(&self, _block: BlockIx) -> Vec<BlockIx> {
      vec![]
    }
    fn opcode(&self, insn: &Self::Inst) -> Opcode {
      insn.0
    }
    fn get_regs(&self, insn: &Self::Inst) -> InstRegUses {
      let mut regs = InstRegUses { used: smallvec![], defined: smallvec![] };
      if let Some(d) = insn.1 {
        regs.defined.push(Reg::new(d));
      }
      if let Some(u) = insn.2 {
        regs.used.push(Reg::new(u));
      }
      regs
    }
    fn mem_access(&self, insn: &Self::Inst) -> MemAccess {
      if insn.0 == LD_OP {
        MemAccess::Load
      } else {
        MemAccess::None
      }
    }
    fn is_region_end(&self, insn: &Self::Inst) -> bool {
      insn.0 == CALL_OP
    }
    fn is_alignment_boundary(&self, insn: &Self::Inst) -> bool {
      insn.0 == CALL_OP
    }
    fn gen_nop(&self, opcode: Opcode) -> Self::Inst {
      (opcode, None, None)
    }
  }

  pub(crate) fn all_insns(f: &Straight) -> Vec<InstIx> {
    (0..f.0.len()).map(|i| InstIx::new(i as u32)).collect()
  }

  #[test]
  fn packs_independent_and_waits_for_latency() {
    let cat = TinyCatalog::new();
    let model = Model::new();
    let hr = HazardRecognizer::new(&cat, &model);
    // ld r1; alu r2 <- r1; alu r3 (independent)
    let f = Straight(vec![
      (LD_OP, Some(1), None),
      (ALU_OP, Some(2), Some(1)),
      (ALU_OP, Some(3), None),
    ]);
    let insns = all_insns(&f);
    let tail = tail_scoreboard(&hr, &[], 0);
    let req = RegionRequest {
      block: BlockIx::new(0),
      insns: &insns,
      first_cycle: 0,
      exit_latencies: &[0, 0, 0],
      tail: &tail,
    };
    let bundles = schedule_region(&f, &hr, &req).unwrap();
    // The load and the independent alu go together, the dependent alu waits
    // three cycles.
    assert_eq!(bundles.len(), 4);
    assert_eq!(bundles[0].len(), 2);
    assert!(bundles[1].is_empty() && bundles[2].is_empty());
    assert_eq!(bundles[3].instrs()[0].0, InstIx::new(1));
  }

  #[test]
  fn exit_latency_and_ending_instruction() {
    let cat = TinyCatalog::new();
    let model = Model::new();
    let hr = HazardRecognizer::new(&cat, &model);
    let f = Straight(vec![(LD_OP, Some(1), None), (CALL_OP, None, None)]);
    let insns = all_insns(&f);
    let tail = tail_scoreboard(&hr, &[], 0);
    let req = RegionRequest {
      block: BlockIx::new(0),
      insns: &insns,
      first_cycle: 2,
      exit_latencies: &[3, 0],
      tail: &tail,
    };
    let bundles = schedule_region(&f, &hr, &req).unwrap();
    // Two empty cycles, the load at cycle 2, done by cycle 5.  The call is
    // standalone, so it can't share the load's bundle.
    assert_eq!(bundles.len(), 5);
    assert!(bundles[0].is_empty() && bundles[1].is_empty());
    assert!(bundles[4].is_standalone());
  }
}
