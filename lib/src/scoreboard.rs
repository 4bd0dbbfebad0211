/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A sliding window of per-cycle resource usage.
//!
//! The scoreboard extends from Head - Depth to Head + Depth - 1.  Emitting
//! an instruction is allowed at offsets [-Depth, 0], which keeps all of its
//! later stages inside the window.  When querying for conflicts, cycles
//! outside the window are considered empty.

use log::trace;
use std::fmt;

use crate::data_structures::{slots_of, SlotBits};
use crate::format::PacketFormats;
use crate::hazard::{FuncUnits, InstrStage, StageKind};

/// The contents of one scoreboard cycle.
pub trait ResourceCycle: Clone + Default + fmt::Debug {
  /// Extra information needed to decide whether two cycles conflict.
  type Ctx: ?Sized;

  fn conflict(&self, other: &Self, ctx: &Self::Ctx) -> bool;
  fn merge(&mut self, other: &Self);
  fn clear(&mut self);
  fn is_empty(&self) -> bool;
  /// Make this cycle conflict with anything that uses a resource.
  fn block(&mut self);
}

/// Functional units and issue slots used in one cycle.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FuncUnitCycle {
  pub required: FuncUnits,
  pub reserved: FuncUnits,
  pub slots: SlotBits,
}

impl FuncUnitCycle {
  pub fn from_slots(slots: SlotBits) -> Self {
    Self { required: 0, reserved: 0, slots }
  }

  pub fn from_stage(stage: &InstrStage) -> Self {
    match stage.kind {
      StageKind::Required => {
        Self { required: stage.units, reserved: 0, slots: 0 }
      }
      StageKind::Reserved => {
        Self { required: 0, reserved: stage.units, slots: 0 }
      }
    }
  }
}

impl ResourceCycle for FuncUnitCycle {
  type Ctx = PacketFormats;

  fn conflict(&self, other: &Self, formats: &PacketFormats) -> bool {
    if (self.required & other.required) != 0
      || (self.slots & other.slots) != 0
      || (self.reserved & other.required) != 0
      || (self.required & other.reserved) != 0
    {
      return true;
    }
    // Only check formats if both sides use slots.  This allows a blocked
    // cycle to be represented without knowing anything about formats.
    self.slots != 0
      && other.slots != 0
      && formats.get_format(self.slots | other.slots).is_none()
  }

  fn merge(&mut self, other: &Self) {
    self.required |= other.required;
    self.reserved |= other.reserved;
    self.slots |= other.slots;
  }

  fn clear(&mut self) {
    *self = Self::default();
  }

  fn is_empty(&self) -> bool {
    self.required == 0 && self.reserved == 0 && self.slots == 0
  }

  fn block(&mut self) {
    self.required = !0;
    self.reserved = !0;
    self.slots = !0;
  }
}

impl fmt::Debug for FuncUnitCycle {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    if self.slots == !0 {
      return write!(fmt, "<blocked>");
    }
    write!(fmt, "req {:#06x} rsv {:#06x} slots ", self.required, self.reserved)?;
    let v: Vec<u32> = slots_of(self.slots).map(|s| s.get()).collect();
    write!(fmt, "{:?}", v)
  }
}

pub struct ResourceScoreboard<R> {
  cycles: Vec<R>,
  // Always a power of two, twice the depth.
  size: i32,
  depth: i32,
  // Index into |cycles| of the current cycle.
  head: i32,
}

impl<R: ResourceCycle> ResourceScoreboard<R> {
  pub fn new() -> Self {
    Self { cycles: Vec::new(), size: 0, depth: 0, head: 0 }
  }

  pub fn depth(&self) -> i32 {
    self.depth
  }

  /// Clear the scoreboard.  The depth is rounded up to a power of two.
  pub fn reset(&mut self, depth: i32) {
    assert!(depth > 0);
    self.depth = (depth as u32).next_power_of_two() as i32;
    self.size = 2 * self.depth;
    self.cycles.clear();
    self.cycles.resize(self.size as usize, R::default());
    self.head = 0;
  }

  pub fn is_valid_delta(&self, delta: i32) -> bool {
    delta >= -self.depth && delta <= 0
  }

  #[inline(always)]
  fn ix(&self, cycle: i32) -> usize {
    ((self.head + cycle) & (self.size - 1)) as usize
  }

  pub fn at(&self, cycle: i32) -> &R {
    &self.cycles[self.ix(cycle)]
  }

  pub fn at_mut(&mut self, cycle: i32) -> &mut R {
    let ix = self.ix(cycle);
    &mut self.cycles[ix]
  }

  /// Move one cycle forward.  The cycle that falls off the back is recycled
  /// as the farthest future cycle, so it is cleared first.
  pub fn advance(&mut self) {
    let depth = self.depth;
    self.at_mut(-depth).clear();
    self.head = (self.head + 1) & (self.size - 1);
  }

  /// Move one cycle backward, recycling the farthest future cycle.
  pub fn recede(&mut self) {
    let depth = self.depth;
    self.at_mut(depth - 1).clear();
    self.head = (self.head - 1) & (self.size - 1);
  }

  /// Check whether this and |other| conflict, with |other| displaced by
  /// |delta| cycles relative to this.
  pub fn conflict(
    &self, other: &ResourceScoreboard<R>, delta: i32, ctx: &R::Ctx,
  ) -> bool {
    let mut cycle = -self.depth + delta;
    let mut other_cycle = -other.depth;
    while cycle < -self.depth {
      cycle += 1;
      other_cycle += 1;
    }
    while cycle < self.depth && other_cycle < other.depth {
      if self.at(cycle).conflict(other.at(other_cycle), ctx) {
        return true;
      }
      cycle += 1;
      other_cycle += 1;
    }
    false
  }

  /// One past the last non-empty cycle at or after the current one, or zero
  /// if there is none.
  pub fn last_occupied(&self) -> i32 {
    let mut last = self.depth - 1;
    while last >= 0 && self.at(last).is_empty() {
      last -= 1;
    }
    last + 1
  }

  pub fn dump(&self) {
    let mut first = -self.depth;
    while first < 0 && self.at(first).is_empty() {
      first += 1;
    }
    let mut last = self.depth - 1;
    while last > 0 && self.at(last).is_empty() {
      last -= 1;
    }
    for c in first..=last {
      trace!("{}\t{:?}", if c == 0 { ">" } else { " " }, self.at(c));
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::data_structures::{slot_bit, Opcode, SlotKind};
  use crate::format::{FieldSign, VliwFormat};

  fn formats() -> PacketFormats {
    let (a, b) = (SlotKind::new(0), SlotKind::new(1));
    PacketFormats::new(vec![
      VliwFormat::new(Opcode(1), "A", &[a], 2, FieldSign::Neutral),
      VliwFormat::new(Opcode(2), "B", &[b], 2, FieldSign::Neutral),
    ])
  }

  fn units(u: FuncUnits) -> FuncUnitCycle {
    FuncUnitCycle { required: u, reserved: 0, slots: 0 }
  }

  #[test]
  fn cycle_conflicts() {
    let f = formats();
    assert!(units(1).conflict(&units(1), &f));
    assert!(!units(1).conflict(&units(2), &f));
    let rsv = FuncUnitCycle::from_stage(&InstrStage::reserved(1, 1));
    assert_eq!(rsv.reserved, 1);
    assert!(rsv.conflict(&units(1), &f));
    assert!(!rsv.conflict(&rsv, &f));
    // Slots 0 and 1 are distinct, but no format holds both.
    let s0 = FuncUnitCycle::from_slots(slot_bit(SlotKind::new(0)));
    let s1 = FuncUnitCycle::from_slots(slot_bit(SlotKind::new(1)));
    assert!(s0.conflict(&s1, &f));
    let mut blocked = FuncUnitCycle::default();
    blocked.block();
    assert!(blocked.conflict(&units(4), &f));
    assert!(!blocked.conflict(&FuncUnitCycle::default(), &f));
  }

  #[test]
  fn advance_and_recede() {
    let mut sb = ResourceScoreboard::<FuncUnitCycle>::new();
    sb.reset(3);
    assert_eq!(sb.depth(), 4);
    sb.at_mut(0).merge(&units(1));
    sb.at_mut(2).merge(&units(2));
    assert_eq!(sb.last_occupied(), 3);
    sb.advance();
    assert_eq!(sb.at(-1).required, 1);
    assert_eq!(sb.at(1).required, 2);
    assert_eq!(sb.last_occupied(), 2);
    sb.recede();
    sb.recede();
    assert_eq!(sb.at(1).required, 1);
    assert_eq!(sb.at(3).required, 2);
    // Cycles that wrap around are clean.
    for _ in 0..8 {
      sb.advance();
    }
    assert_eq!(sb.last_occupied(), 0);
    assert!(sb.is_valid_delta(-4) && !sb.is_valid_delta(1));
  }

  #[test]
  fn scoreboard_overlay() {
    let f = formats();
    let mut a = ResourceScoreboard::<FuncUnitCycle>::new();
    let mut b = ResourceScoreboard::<FuncUnitCycle>::new();
    a.reset(4);
    b.reset(4);
    a.at_mut(1).merge(&units(1));
    b.at_mut(0).merge(&units(1));
    assert!(!a.conflict(&b, 0, &f));
    assert!(a.conflict(&b, 1, &f));
  }
}
