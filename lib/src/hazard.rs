/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Itineraries and the hazard recognizer that applies them to scoreboards.

use log::trace;
use smallvec::SmallVec;

use crate::bundle::Bundle;
use crate::data_structures::{Opcode, SlotBits};
use crate::interface::{SchedModel, SlotCatalog};
use crate::scoreboard::{FuncUnitCycle, ResourceCycle, ResourceScoreboard};

pub type FuncUnits = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StageKind {
  /// The units are used exclusively.
  Required,
  /// The units are reserved, and only conflict with required uses.
  Reserved,
}

/// One stage of an itinerary: |units| are busy for |cycles| cycles, and the
/// next stage starts |next_cycles| after this one.
#[derive(Copy, Clone, Debug)]
pub struct InstrStage {
  pub cycles: u32,
  pub next_cycles: u32,
  pub units: FuncUnits,
  pub kind: StageKind,
}

impl InstrStage {
  pub fn new(cycles: u32, units: FuncUnits) -> Self {
    Self { cycles, next_cycles: cycles, units, kind: StageKind::Required }
  }
  pub fn reserved(cycles: u32, units: FuncUnits) -> Self {
    Self { cycles, next_cycles: cycles, units, kind: StageKind::Reserved }
  }
  pub fn then(mut self, next_cycles: u32) -> Self {
    self.next_cycles = next_cycles;
    self
  }
}

#[derive(Clone, Debug, Default)]
pub struct Itinerary {
  pub stages: SmallVec<[InstrStage; 4]>,
  /// Cycles until the result is available to readers.
  pub latency: u32,
  /// Conservative latency of the memory access, zero if there is none.
  pub memory_latency: u32,
}

impl Itinerary {
  pub fn new(stages: &[InstrStage], latency: u32) -> Self {
    Self { stages: stages.iter().cloned().collect(), latency, memory_latency: 0 }
  }

  pub fn with_memory_latency(mut self, memory_latency: u32) -> Self {
    self.memory_latency = memory_latency;
    self
  }

  pub fn max_latency(&self) -> u32 {
    self.latency.max(self.memory_latency)
  }

  /// The number of cycles, counted from issue, during which some stage is
  /// busy.
  pub fn depth(&self) -> u32 {
    let mut cur = 0;
    let mut depth = 0;
    for st in self.stages.iter() {
      depth = depth.max(cur + st.cycles);
      cur += st.next_cycles;
    }
    depth
  }
}

/// Compute the pipeline depth and max latency of a set of itineraries.
pub fn itinerary_bounds<'a>(
  itins: impl Iterator<Item = &'a Itinerary>,
) -> (u32, u32) {
  itins.fold((0, 0), |(d, l), it| (d.max(it.depth()), l.max(it.max_latency())))
}

//=============================================================================
// The hazard recognizer.

pub struct HazardRecognizer<'a> {
  catalog: &'a dyn SlotCatalog,
  model: &'a dyn SchedModel,
  pipeline_depth: u32,
  max_latency: u32,
  look_ahead: i32,
}

impl<'a> HazardRecognizer<'a> {
  pub fn new(catalog: &'a dyn SlotCatalog, model: &'a dyn SchedModel) -> Self {
    let pipeline_depth = model.pipeline_depth().max(1);
    let max_latency = model.max_latency();
    // Room for a conflict horizon's worth of bundles past a region's end,
    // each with all of its stages.
    let look_ahead =
      (2 * pipeline_depth.max(max_latency) + 1).next_power_of_two();
    Self {
      catalog,
      model,
      pipeline_depth,
      max_latency,
      look_ahead: look_ahead as i32,
    }
  }

  pub fn catalog(&self) -> &'a dyn SlotCatalog {
    self.catalog
  }

  pub fn model(&self) -> &'a dyn SchedModel {
    self.model
  }

  pub fn pipeline_depth(&self) -> u32 {
    self.pipeline_depth
  }

  pub fn max_latency(&self) -> u32 {
    self.max_latency
  }

  /// The number of cycles over which an instruction can interact with
  /// another one, either through resources or through latency.
  pub fn conflict_horizon(&self) -> i32 {
    self.pipeline_depth.max(self.max_latency) as i32
  }

  pub fn max_look_ahead(&self) -> i32 {
    self.look_ahead
  }

  pub fn new_scoreboard(&self) -> ResourceScoreboard<FuncUnitCycle> {
    let mut sb = ResourceScoreboard::new();
    sb.reset(self.look_ahead);
    sb
  }

  /// Would |opcode|, issued at |delta| and occupying |slots|, conflict with
  /// |sb|?
  pub fn check_conflict(
    &self, sb: &ResourceScoreboard<FuncUnitCycle>, opcode: Opcode,
    slots: SlotBits, delta: i32,
  ) -> bool {
    debug_assert!(delta >= -sb.depth() && delta < sb.depth());
    if self.catalog.is_meta(opcode) {
      return false;
    }
    let issue = FuncUnitCycle::from_slots(slots);
    if issue.conflict(sb.at(delta), self.catalog.formats()) {
      trace!("hazard: slots at {}", delta);
      return true;
    }
    let mut cycle = delta;
    for stage in self.model.itinerary(opcode).stages.iter() {
      let this_cycle = FuncUnitCycle::from_stage(stage);
      for c in 0..stage.cycles as i32 {
        let stage_cycle = cycle + c;
        debug_assert!(stage_cycle < sb.depth());
        if this_cycle.conflict(sb.at(stage_cycle), self.catalog.formats()) {
          trace!("hazard: stage in cycle {}", stage_cycle - delta);
          return true;
        }
      }
      cycle += stage.next_cycles as i32;
    }
    false
  }

  /// Record the resources of |opcode| issued at |delta|.
  pub fn emit_in_scoreboard(
    &self, sb: &mut ResourceScoreboard<FuncUnitCycle>, opcode: Opcode,
    slots: SlotBits, delta: i32,
  ) {
    debug_assert!(delta >= -sb.depth() && delta < sb.depth());
    if self.catalog.is_meta(opcode) {
      return;
    }
    sb.at_mut(delta).merge(&FuncUnitCycle::from_slots(slots));
    let mut cycle = delta;
    for stage in self.model.itinerary(opcode).stages.iter() {
      let this_cycle = FuncUnitCycle::from_stage(stage);
      for c in 0..stage.cycles as i32 {
        debug_assert!(cycle + c < sb.depth());
        sb.at_mut(cycle + c).merge(&this_cycle);
      }
      cycle += stage.next_cycles as i32;
    }
  }

  /// Record every non-meta member of |bundle| issued at |delta|.
  pub fn emit_bundle<I: Clone>(
    &self, sb: &mut ResourceScoreboard<FuncUnitCycle>, bundle: &Bundle<I>,
    delta: i32,
  ) {
    for (opcode, slots) in bundle.issue_slots() {
      self.emit_in_scoreboard(sb, opcode, slots, delta);
    }
  }

  pub fn block_cycle(
    &self, sb: &mut ResourceScoreboard<FuncUnitCycle>, delta: i32,
  ) {
    sb.at_mut(delta).block();
  }

  /// Latency of the instruction's result, memory included.
  pub fn max_latency_of(&self, opcode: Opcode) -> u32 {
    self.model.itinerary(opcode).max_latency()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn itinerary_depth_and_latency() {
    let it = Itinerary::new(
      &[InstrStage::new(1, 1).then(1), InstrStage::new(2, 2), InstrStage::new(1, 4)],
      3,
    )
    .with_memory_latency(5);
    assert_eq!(it.depth(), 4);
    assert_eq!(it.max_latency(), 5);
    let empty = Itinerary::default();
    assert_eq!(empty.depth(), 0);
    let (d, l) = itinerary_bounds(vec![it.clone(), empty].iter());
    assert_eq!((d, l), (4, 5));
  }
}
