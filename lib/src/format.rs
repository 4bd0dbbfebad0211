/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! VLIW formats: the fixed-size encodings that hold a set of occupied slots,
//! and the table used to look them up.

use log::trace;
use smallvec::SmallVec;

use crate::data_structures::{slot_bit, Map, Opcode, SlotBits, SlotKind};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Signedness requirement of a format's immediate fields.  Two formats with
/// the same slots and size can differ only in this respect; the catalog's
/// per-opcode hints are used to pick one of them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum FieldSign {
  Neutral,
  Signed,
  Unsigned,
}

/// Description of one issue slot.
#[derive(Clone, Debug)]
pub struct SlotInfo {
  pub kind: SlotKind,
  pub name: String,
  /// Encoded width of the slot, in bits.
  pub size: u32,
  /// The no-op that fills this slot when nothing else occupies it.
  pub nop_opcode: Opcode,
}

impl SlotInfo {
  pub fn new(kind: SlotKind, name: &str, size: u32, nop_opcode: Opcode) -> Self {
    Self { kind, name: name.to_string(), size, nop_opcode }
  }
}

#[derive(Clone, Debug)]
pub struct VliwFormat {
  pub opcode: Opcode,
  pub name: String,
  /// Slots in encoding order.
  pub slots: SmallVec<[SlotKind; 8]>,
  /// Encoded size in bytes.
  pub size: u32,
  pub slot_set: SlotBits,
  pub sign: FieldSign,
}

impl VliwFormat {
  pub fn new(
    opcode: Opcode, name: &str, slots: &[SlotKind], size: u32, sign: FieldSign,
  ) -> Self {
    let slot_set = slots.iter().fold(0, |acc, s| acc | slot_bit(*s));
    Self {
      opcode,
      name: name.to_string(),
      slots: slots.iter().cloned().collect(),
      size,
      slot_set,
      sign,
    }
  }

  /// Can this format hold all of |slots|?
  #[inline(always)]
  pub fn covers(&self, slots: SlotBits) -> bool {
    slots & !self.slot_set == 0
  }
}

//=============================================================================
// The format table.  Formats are kept sorted by size; among formats of equal
// size the table order is preserved, which defines the default preference.

pub struct PacketFormats {
  formats: Vec<VliwFormat>,
  by_opcode: Map<Opcode, usize>,
  max_size: u32,
}

impl PacketFormats {
  pub fn new(mut formats: Vec<VliwFormat>) -> Self {
    // Stable, so equal-size formats keep their declared order.
    formats.sort_by_key(|f| f.size);
    let mut by_opcode = Map::default();
    for (ix, f) in formats.iter().enumerate() {
      let prev = by_opcode.insert(f.opcode, ix);
      assert!(prev.is_none(), "PacketFormats: duplicate format opcode");
    }
    let max_size = formats.iter().map(|f| f.size).max().unwrap_or(0);
    Self { formats, by_opcode, max_size }
  }

  /// The smallest format that covers |slots|.
  pub fn get_format(&self, slots: SlotBits) -> Option<&VliwFormat> {
    let res = self.formats.iter().find(|f| f.covers(slots));
    trace!("get_format({:#x}) = {:?}", slots, res.map(|f| &f.name));
    res
  }

  /// The first format of exactly |size| bytes that covers |slots|.
  pub fn get_format_by_size(
    &self, slots: SlotBits, size: u32,
  ) -> Option<&VliwFormat> {
    self.formats.iter().find(|f| f.size == size && f.covers(slots))
  }

  /// All formats covering |slots|, smallest first.
  pub fn formats_covering(
    &self, slots: SlotBits,
  ) -> impl Iterator<Item = &VliwFormat> {
    self.formats.iter().filter(move |f| f.covers(slots))
  }

  /// All formats of minimal size covering |slots|.  Empty if there is none.
  pub fn minimal_candidates(&self, slots: SlotBits) -> Vec<&VliwFormat> {
    match self.get_format(slots) {
      None => vec![],
      Some(first) => {
        let size = first.size;
        self.formats_covering(slots).take_while(|f| f.size == size).collect()
      }
    }
  }

  pub fn format_by_opcode(&self, opcode: Opcode) -> Option<&VliwFormat> {
    self.by_opcode.get(&opcode).map(|ix| &self.formats[*ix])
  }

  pub fn max_size(&self) -> u32 {
    self.max_size
  }

  pub fn iter(&self) -> std::slice::Iter<VliwFormat> {
    self.formats.iter()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn s(n: u32) -> SlotKind {
    SlotKind::new(n)
  }

  fn table() -> PacketFormats {
    PacketFormats::new(vec![
      VliwFormat::new(Opcode(103), "big", &[s(0), s(1), s(2)], 8, FieldSign::Neutral),
      VliwFormat::new(Opcode(100), "a", &[s(0)], 2, FieldSign::Neutral),
      VliwFormat::new(Opcode(101), "ab_s", &[s(0), s(1)], 4, FieldSign::Signed),
      VliwFormat::new(Opcode(102), "ab_u", &[s(0), s(1)], 4, FieldSign::Unsigned),
    ])
  }

  #[test]
  fn smallest_covering_format() {
    let t = table();
    assert_eq!(t.get_format(slot_bit(s(0))).unwrap().name, "a");
    assert_eq!(t.get_format(slot_bit(s(1))).unwrap().name, "ab_s");
    assert_eq!(t.get_format(slot_bit(s(2))).unwrap().name, "big");
    assert!(t.get_format(slot_bit(s(3))).is_none());
    // The empty set is covered by the smallest format.
    assert_eq!(t.get_format(0).unwrap().size, 2);
  }

  #[test]
  fn sized_lookup_and_candidates() {
    let t = table();
    let bits = slot_bit(s(0));
    assert_eq!(t.get_format_by_size(bits, 8).unwrap().name, "big");
    assert!(t.get_format_by_size(bits, 6).is_none());
    let c = t.minimal_candidates(slot_bit(s(1)));
    assert_eq!(c.len(), 2);
    assert_eq!(c[0].sign, FieldSign::Signed);
    assert_eq!(t.format_by_opcode(Opcode(102)).unwrap().name, "ab_u");
    assert_eq!(t.max_size(), 8);
  }
}
