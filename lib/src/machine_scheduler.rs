/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Top level of the scheduler: schedule every block region by region until
//! the coordinator is satisfied, then encode and align the result.

use log::{debug, info};

use crate::alignment::apply_alignment;
use crate::analysis::CFGInfo;
use crate::data_structures::BlockIx;
use crate::emit::lower_block;
use crate::format_selector::select_formats;
use crate::interblock::{BlockType, ConvergenceResult, InterBlockScheduling};
use crate::interface::{
  BlockStats, Function, SchedError, SchedModel, SchedOptions, ScheduleResult,
  SlotCatalog,
};
use crate::region_scheduler::{schedule_region, RegionRequest};

/// Schedule every region of |b| once, with the coordinator's current
/// assumptions.
fn schedule_block<F: Function>(
  func: &F, ibs: &mut InterBlockScheduling, b: BlockIx,
) -> Result<(), SchedError> {
  ibs.enter_block(b);
  let num_regions = ibs.block(b).regions().len();
  for region in 0..num_regions {
    let insns = ibs.block(b).regions()[region].insns().to_vec();
    let exit_latencies = ibs.exit_latencies(func, b, region);
    let tail = ibs.tail_scoreboard(b, region);
    let req = RegionRequest {
      block: b,
      insns: &insns,
      first_cycle: ibs.first_cycle(b, region),
      exit_latencies: &exit_latencies,
      tail: &tail,
    };
    let bundles = schedule_region(func, ibs.hazard_recognizer(), &req)?;
    debug!("{:?} region {}: {} cycles", b, region, bundles.len());
    ibs.set_region_bundles(b, region, bundles);
  }
  Ok(())
}

fn block_stats(
  ibs: &InterBlockScheduling, b: BlockIx, cycles: u32,
) -> BlockStats {
  let bs = ibs.block(b);
  BlockStats {
    kind: bs.kind,
    iterations: bs.fixpoint.iterations,
    latency_margin: bs.fixpoint.latency_margin,
    resource_margin: bs.fixpoint.resource_margin,
    safety_margin: if bs.kind == BlockType::Loop {
      bs.safety_margin()
    } else {
      0
    },
    entry_nops: bs.entry_nops(),
    cycles,
  }
}

#[inline(never)]
pub fn run<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, model: &dyn SchedModel,
  opts: &SchedOptions,
) -> Result<ScheduleResult<F::Inst>, SchedError> {
  let cfg = CFGInfo::create(func)?;

  let mut ibs = InterBlockScheduling::new(catalog, model, opts);
  ibs.enter_function(func, &cfg);

  while let Some(b) = ibs.next_block() {
    schedule_block(func, &mut ibs, b)?;
    match ibs.leave_block(func, b) {
      ConvergenceResult::Converged => {}
      ConvergenceResult::RetryWithMargins { latency, resource } => {
        debug!("{:?}: retry with lm={} rm={}", b, latency, resource);
      }
      ConvergenceResult::Fatal => {
        let iterations = ibs.block(b).fixpoint.iterations;
        info!("{:?}: giving up after {} iterations", b, iterations);
        return Err(SchedError::NotConverged { block: b, iterations });
      }
    }
  }

  let mut blocks = vec![];
  let mut stats = vec![];
  let mut total_cycles = 0;
  for b in func.blocks() {
    let mut sched = lower_block(func, catalog, b, ibs.block(b));
    select_formats(func, catalog, &mut sched)?;
    if !opts.skip_alignment {
      apply_alignment(func, catalog, &mut sched)?;
    }
    let cycles = sched.num_cycles();
    total_cycles += cycles;
    stats.push(block_stats(&ibs, b, cycles));
    blocks.push(sched);
  }
  ibs.leave_function();

  info!("scheduled {} blocks in {} cycles", blocks.len(), total_cycles);
  Ok(ScheduleResult { blocks, stats, total_cycles })
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::bundle::test::{TinyCatalog, ALU_OP, CALL_OP, LNG_OP};
  use crate::data_structures::Opcode;
  use crate::interblock::test::{Cfg, Model};

  // b0 -> b1; b1 -> {b1, b2}; b2 exits.  The loop is |body| alone, reading
  // its own result of the previous iteration.
  fn single_block_loop(body: Opcode) -> Cfg {
    Cfg {
      insns: vec![ALU_OP, body, ALU_OP],
      blocks: vec![(0, 1, vec![1]), (1, 1, vec![1, 2]), (2, 1, vec![])],
      carried: vec![body],
    }
  }

  // Iterate the loop |lp| until it converges.  Returns the margins of
  // every attempt.
  fn fixpoint(
    f: &Cfg, ibs: &mut InterBlockScheduling, lp: BlockIx,
  ) -> Vec<(i32, i32)> {
    assert_eq!(ibs.next_block(), Some(lp));
    let mut margins = vec![(0, 0)];
    loop {
      schedule_block(f, ibs, lp).unwrap();
      match ibs.leave_block(f, lp) {
        ConvergenceResult::Converged => return margins,
        ConvergenceResult::RetryWithMargins { latency, resource } => {
          margins.push((latency, resource))
        }
        ConvergenceResult::Fatal => panic!("{:?} did not converge", lp),
      }
    }
  }

  #[test]
  fn margins_only_grow() {
    let cat = TinyCatalog::new();
    let model = Model::new();
    let f = single_block_loop(LNG_OP);
    let cfg = CFGInfo::create(&f).unwrap();
    let mut ibs =
      InterBlockScheduling::new(&cat, &model, &SchedOptions::default());
    ibs.enter_function(&f, &cfg);
    let lp = BlockIx::new(1);
    let margins = fixpoint(&f, &mut ibs, lp);
    // Every retry raises exactly one margin, and none ever drops.
    for w in margins.windows(2) {
      assert!(w[1].0 >= w[0].0 && w[1].1 >= w[0].1, "{:?}", margins);
      assert!(w[1] != w[0], "{:?}", margins);
    }
    // The long op's result is only ready after three cycles.
    let bs = ibs.block(lp);
    assert!(bs.is_scheduled());
    assert_eq!(bs.fixpoint.latency_margin, 3);
    assert_eq!(bs.fixpoint.iterations as usize, margins.len() - 1);
    assert_eq!(bs.schedule_length(), 3);
  }

  #[test]
  fn loops_check_resources_without_interblock_scoreboard() {
    let cat = TinyCatalog::new();
    let model = Model::new();
    // Nothing is carried, so only the long op's unit can clash with the
    // next iteration.
    let f = Cfg { carried: vec![], ..single_block_loop(LNG_OP) };
    let cfg = CFGInfo::create(&f).unwrap();
    let opts =
      SchedOptions { interblock_scoreboard: false, ..SchedOptions::default() };
    let mut ibs = InterBlockScheduling::new(&cat, &model, &opts);
    ibs.enter_function(&f, &cfg);
    let lp = BlockIx::new(1);
    let margins = fixpoint(&f, &mut ibs, lp);
    assert!(margins.len() > 1, "{:?}", margins);

    let bs = ibs.block(lp);
    assert_eq!(bs.kind, BlockType::Loop);
    assert_eq!(bs.fixpoint.latency_margin, 0);
    assert!(bs.fixpoint.resource_margin >= 1);
    // The unit stays busy for three cycles and the op is its own successor.
    assert_eq!(bs.schedule_length(), 3);
  }

  #[test]
  fn unconvergeable_loop_is_reported() {
    let cat = TinyCatalog::new();
    let model = Model::new();
    // The call closes the loop's only region, so it stays in the last cycle
    // whatever the margins, and its result is never ready in time for the
    // next iteration.
    let f = single_block_loop(CALL_OP);
    let horizon = 3;
    match run(&f, &cat, &model, &SchedOptions::default()) {
      Err(SchedError::NotConverged { block, iterations }) => {
        assert_eq!(block, BlockIx::new(1));
        assert_eq!(iterations, 2 * horizon + 1);
      }
      Err(e) => panic!("unexpected error {:?}", e),
      Ok(_) => panic!("scheduled a loop that can't converge"),
    }
  }
}
