/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checks on test functions and on their schedules.

use crate::test_framework::*;
use vliwsched::{
  regroup_bundle, BlockIx, BlockType, CodeItem, DataDependenceGraph,
  Function, HazardRecognizer, NodeIx, SchedOptions, ScheduleResult,
  ScheduledBlock, SlotCatalog,
};

/// Is |func| well formed?  Blocks must tile the instruction vector in order,
/// control flow may only end a block, and every label must be resolved to an
/// existing block.
pub fn validate(func: &Func) -> Result<(), String> {
  if func.blocks.is_empty() {
    return Err("no blocks".into());
  }

  let mut next_start = 0;
  for b in func.blocks.iter() {
    if b.start.get() != next_start {
      return Err(format!("block {} is incorrectly specified", b.name));
    }
    next_start = match b.start.get().checked_add(b.len) {
      Some(end) => end,
      None => {
        return Err(format!("too many instructions in block {}", b.name))
      }
    };
  }
  if next_start != func.insns.len() {
    return Err(format!("unused instructions"));
  }

  for b in func.blocks.iter() {
    for i in b.start.dotdot(b.start.plus(b.len)) {
      let inst = &func.insns[i];
      if inst.is_nop() {
        return Err(format!("filler {:?} in block {}", inst, b.name));
      }
      if inst.is_control_flow() && i != b.start.plus(b.len - 1) {
        return Err(format!(
          "control flow inst {:?} in the middle of block {}",
          inst, b.name
        ));
      }
      let (defs, uses) = inst.reg_usage();
      let num_regs = func.num_regs as usize;
      if let Some(r) =
        defs.iter().chain(uses.iter()).find(|r| r.get_index() >= num_regs)
      {
        return Err(format!("inst {:?} uses unknown {:?}", inst, r));
      }
      for target in inst.targets() {
        if target.get() >= func.blocks.len() {
          return Err(format!("inst {:?} jumps nowhere", inst));
        }
      }
    }
  }

  Ok(())
}

//=============================================================================
// Schedule checks.

/// The cycle of each original instruction of |sched|'s block, indexed by
/// position in the block.  Meta instructions get None.
fn place_insns(
  func: &Func, target: &ToyTarget, sched: &ScheduledBlock<Inst>,
) -> Result<Vec<Option<u32>>, String> {
  let range = func.block_insns(sched.block);
  let original: Vec<&Inst> =
    range.into_iter().map(|i| &func.insns[i]).collect();
  let mut cycles: Vec<Option<u32>> = vec![None; original.len()];
  let mut placed = vec![false; original.len()];

  let mut place = |insn: &Inst, cycle: Option<u32>| -> Result<(), String> {
    let pos = original
      .iter()
      .enumerate()
      .position(|(ix, orig)| !placed[ix] && *orig == insn);
    match pos {
      Some(ix) => {
        placed[ix] = true;
        cycles[ix] = cycle;
        Ok(())
      }
      None => Err(format!("{:?}: unexpected {:?}", sched.block, insn)),
    }
  };

  let mut cycle = 0;
  for item in &sched.items {
    match item {
      CodeItem::Bundle { members, .. } => {
        for insn in members.iter().filter(|insn| !insn.is_nop()) {
          place(insn, Some(cycle))?;
        }
        cycle += 1;
      }
      CodeItem::Single(insn) => {
        place(insn, Some(cycle))?;
        cycle += 1;
      }
      CodeItem::Meta(insn) => {
        if !target.is_meta(insn.opcode()) {
          return Err(format!("{:?}: {:?} is not meta", sched.block, insn));
        }
        place(insn, None)?;
      }
    }
  }

  if let Some(ix) = placed.iter().position(|p| !p) {
    return Err(format!("{:?}: lost {:?}", sched.block, original[ix]));
  }
  Ok(cycles)
}

fn check_dependences(
  func: &Func, target: &ToyTarget, b: BlockIx, cycles: &[Option<u32>],
) -> Result<(), String> {
  let mut ddg = DataDependenceGraph::new();
  for iix in func.block_insns(b) {
    ddg.add_node(func, target, iix);
  }
  ddg.build_edges();
  for (i, from) in cycles.iter().enumerate() {
    let from = match from {
      Some(c) => *c as i32,
      None => continue,
    };
    for edge in ddg.succs(NodeIx::new(i as u32)) {
      let to = match cycles[edge.node.get()] {
        Some(c) => c as i32,
        None => continue,
      };
      if to - from < edge.latency {
        return Err(format!(
          "{:?}: {:?} edge {} -> {} needs {} cycles, has {}",
          b,
          edge.kind,
          i,
          edge.node.get(),
          edge.latency,
          to - from
        ));
      }
    }
  }
  Ok(())
}

/// Replay |items| cycle by cycle on a fresh scoreboard.
fn replay<'i>(
  func: &Func, target: &ToyTarget, b: BlockIx,
  items: impl Iterator<Item = &'i CodeItem<Inst>>,
) -> Result<(), String> {
  let hr = HazardRecognizer::new(target, target);
  let mut sb = hr.new_scoreboard();
  let mut cycle = 0;
  for item in items {
    let issues = match item {
      CodeItem::Bundle { opcode, members } => {
        match regroup_bundle(func, target, *opcode, members) {
          Some(bundle) => bundle.issue_slots(),
          None => {
            return Err(format!(
              "{:?}: cycle {}: {:?} doesn't match its format",
              b, cycle, members
            ))
          }
        }
      }
      CodeItem::Single(insn) => vec![(insn.opcode(), 0)],
      CodeItem::Meta(_) => continue,
    };
    for (opcode, slots) in issues {
      if hr.check_conflict(&sb, opcode, slots, 0) {
        return Err(format!(
          "{:?}: cycle {}: resource conflict for {:?}",
          b, cycle, opcode
        ));
      }
      hr.emit_in_scoreboard(&mut sb, opcode, slots, 0);
    }
    sb.advance();
    cycle += 1;
  }
  Ok(())
}

fn check_resources(
  func: &Func, target: &ToyTarget, sched: &ScheduledBlock<Inst>,
) -> Result<(), String> {
  replay(func, target, sched.block, sched.items.iter())
}

/// Check the latencies of the dependences from |b| into |s|, with |s|
/// issued right after |b|'s last cycle.  A user latency margin bounds what
/// a non-loop block guarantees at its end.
fn check_edge_latencies(
  func: &Func, target: &ToyTarget, b: BlockIx, s: BlockIx, len_b: u32,
  from: &[Option<u32>], to: &[Option<u32>], margin: Option<u32>,
) -> Result<(), String> {
  let mut ddg = DataDependenceGraph::new();
  for iix in func.block_insns(b) {
    ddg.add_node(func, target, iix);
  }
  ddg.mark_boundary();
  for iix in func.block_insns(s) {
    ddg.add_node(func, target, iix);
  }
  ddg.build_edges();

  let num_b = from.len();
  for (i, cycle) in from.iter().enumerate() {
    let issue = match cycle {
      Some(c) => *c as i32,
      None => continue,
    };
    for edge in ddg.post_boundary_succs(NodeIx::new(i as u32)) {
      let j = edge.node.get() - num_b;
      let use_cycle = match to[j] {
        Some(c) => c as i32,
        None => continue,
      };
      let needed = match margin {
        Some(m) => edge.latency.min(m as i32),
        None => edge.latency,
      };
      let distance = len_b as i32 - issue + use_cycle;
      if distance < needed {
        return Err(format!(
          "{:?} -> {:?}: {:?} edge {} -> {} needs {} cycles, has {}",
          b, s, edge.kind, i, j, needed, distance
        ));
      }
    }
  }
  Ok(())
}

/// Check every control flow edge b -> s, the loop backedges included: the
/// end of |b| followed by the start of |s| must respect both the
/// dependences and the resources.
fn check_edges(
  func: &Func, target: &ToyTarget, opts: &SchedOptions,
  result: &ScheduleResult<Inst>, cycles: &[Vec<Option<u32>>],
) -> Result<(), String> {
  for (sched, stats) in result.blocks.iter().zip(result.stats.iter()) {
    let b = sched.block;
    let margin = match opts.latency_margin {
      Some(m) if stats.kind != BlockType::Loop => Some(m),
      _ => None,
    };
    for s in func.block_succs(b) {
      let succ = &result.blocks[s.get() as usize];
      check_edge_latencies(
        func,
        target,
        b,
        s,
        sched.num_cycles(),
        &cycles[b.get() as usize],
        &cycles[s.get() as usize],
        margin,
      )?;
      replay(func, target, b, sched.items.iter().chain(succ.items.iter()))
        .map_err(|err| format!("edge {:?} -> {:?}: {}", b, s, err))?;
    }
  }
  Ok(())
}

fn item_size(target: &ToyTarget, item: &CodeItem<Inst>) -> u32 {
  match item {
    CodeItem::Bundle { opcode, .. } => {
      target.format_by_opcode(*opcode).map_or(0, |f| f.size)
    }
    CodeItem::Single(insn) => target.standalone_size(insn.opcode()),
    CodeItem::Meta(_) => 0,
  }
}

fn check_alignment(
  func: &Func, target: &ToyTarget, sched: &ScheduledBlock<Inst>,
) -> Result<(), String> {
  let quantum = target.alignment();
  let mut size = 0;
  for item in &sched.items {
    size += item_size(target, item);
    let boundary = match item {
      CodeItem::Bundle { members, .. } => {
        members.iter().any(|insn| func.is_alignment_boundary(insn))
      }
      CodeItem::Single(insn) => func.is_alignment_boundary(insn),
      CodeItem::Meta(_) => false,
    };
    if boundary {
      if size % quantum != 0 {
        return Err(format!("{:?}: region of {} bytes", sched.block, size));
      }
      size = 0;
    }
  }
  if size % quantum != 0 {
    return Err(format!("{:?}: tail region of {} bytes", sched.block, size));
  }
  Ok(())
}

/// Check a schedule of |func|: every instruction is issued exactly once,
/// dependences and resources are respected within blocks and across every
/// control flow edge, every bundle is encoded in a format of the catalog
/// and, unless disabled, the code is aligned.
pub fn check_schedule(
  func: &Func, target: &ToyTarget, opts: &SchedOptions,
  result: &ScheduleResult<Inst>,
) -> Result<(), String> {
  if result.blocks.len() != func.blocks.len() as usize
    || result.stats.len() != result.blocks.len()
  {
    return Err("wrong number of blocks".into());
  }

  let mut total = 0;
  let mut all_cycles = vec![];
  for (ix, (sched, stats)) in
    result.blocks.iter().zip(result.stats.iter()).enumerate()
  {
    if sched.block != BlockIx::new(ix as u32) {
      return Err(format!("{:?} out of layout order", sched.block));
    }
    if stats.cycles != sched.num_cycles() {
      return Err(format!("{:?}: wrong cycle count", sched.block));
    }
    total += stats.cycles;

    if let Some(item) = sched.items.iter().find(|item| match item {
      CodeItem::Bundle { opcode, .. } => *opcode == target.bundle_opcode(),
      _ => false,
    }) {
      return Err(format!("{:?}: unencoded {:?}", sched.block, item));
    }

    let cycles = place_insns(func, target, sched)?;
    check_dependences(func, target, sched.block, &cycles)?;
    all_cycles.push(cycles);
    check_resources(func, target, sched)?;
    if !opts.skip_alignment {
      check_alignment(func, target, sched)?;
    }

    // Without the epilogue analysis the entry nops are whole cycles of
    // fillers.
    if stats.kind == BlockType::Epilogue && !opts.epilogue_analysis {
      let fillers = sched
        .items
        .iter()
        .filter(|item| item.is_cycle())
        .take(stats.entry_nops as usize)
        .all(|item| match item {
          CodeItem::Bundle { members, .. } => {
            members.iter().all(|insn| insn.is_nop())
          }
          _ => false,
        });
      if !fillers || sched.num_cycles() < stats.entry_nops {
        return Err(format!("{:?}: missing entry nops", sched.block));
      }
    }
  }

  if total != result.total_cycles {
    return Err("wrong total cycle count".into());
  }
  check_edges(func, target, opts, result, &all_cycles)
}
