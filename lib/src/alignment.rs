/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Alignment of the instruction stream.
//!
//! The code between two alignment boundaries (calls, returns, block ends)
//! must add up to a multiple of the fetch quantum.  No instruction is added
//! for this: bundles are re-encoded in larger formats holding the same
//! instructions, with more no-op fillers.
//!
//! Each round first tries to absorb the padding without overshooting it, and
//! then, if padding remains, lets one bundle overshoot into the next quantum.

use log::{debug, trace};

use crate::bundle::Bundle;
use crate::data_structures::Opcode;
use crate::emit::{CodeItem, ScheduledBlock};
use crate::format::{FieldSign, VliwFormat};
use crate::format_selector::{encode_members, pick_candidate, regroup_bundle};
use crate::interface::{Function, SchedError, SlotCatalog};

fn bundle_format<'c>(
  catalog: &'c dyn SlotCatalog, opcode: Opcode,
) -> &'c VliwFormat {
  match catalog.format_by_opcode(opcode) {
    Some(format) => format,
    None => panic!("apply_alignment: bundle without a format ({:?})", opcode),
  }
}

/// Encoded size of |item|, in bytes.
fn item_size<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, item: &CodeItem<F::Inst>,
) -> u32 {
  match item {
    CodeItem::Bundle { opcode, .. } => bundle_format(catalog, *opcode).size,
    CodeItem::Single(insn) => catalog.standalone_size(func.opcode(insn)),
    CodeItem::Meta(_) => 0,
  }
}

fn ends_alignment_region<F: Function>(func: &F, item: &CodeItem<F::Inst>) -> bool {
  match item {
    CodeItem::Bundle { members, .. } => {
      members.iter().any(|insn| func.is_alignment_boundary(insn))
    }
    CodeItem::Single(insn) => func.is_alignment_boundary(insn),
    CodeItem::Meta(_) => false,
  }
}

/// The format of exactly |size| bytes holding |content|.  A format with the
/// same field sign as |current| is preferred; otherwise the choice is made
/// as for a freshly scheduled bundle.
fn sized_format<'c, I: Clone>(
  catalog: &'c dyn SlotCatalog, content: &Bundle<I>, current: &VliwFormat,
  size: u32,
) -> Option<&'c VliwFormat> {
  let slots = content.occupied_slots();
  let candidates: Vec<&VliwFormat> = catalog
    .formats()
    .iter()
    .filter(|f| f.size == size && f.covers(slots))
    .collect();
  if candidates.is_empty() {
    return None;
  }
  if current.sign != FieldSign::Neutral {
    if let Some(f) = candidates.iter().find(|f| f.sign == current.sign) {
      return Some(*f);
    }
  }
  pick_candidate(catalog, &candidates, slots, &content.opcodes()).ok()
}

/// A bundle item, decoded for elongation.
struct Stretchable<'c, I: Clone> {
  current: &'c VliwFormat,
  /// The real members, no-op fillers left out.
  content: Bundle<I>,
  max_size: u32,
}

fn stretchable<'c, F: Function>(
  func: &F, catalog: &'c dyn SlotCatalog, item: &CodeItem<F::Inst>,
) -> Option<Stretchable<'c, F::Inst>> {
  let (opcode, members) = match item {
    CodeItem::Bundle { opcode, members } => (*opcode, members),
    _ => return None,
  };
  let current = bundle_format(catalog, opcode);
  let content = match regroup_bundle(func, catalog, opcode, members) {
    Some(content) => content,
    None => panic!("apply_alignment: members don't match {}", current.name),
  };
  // Formats are sorted by size.
  let max_size = catalog
    .formats()
    .iter()
    .rev()
    .filter(|f| f.size > current.size && f.covers(content.occupied_slots()))
    .find(|f| sized_format(catalog, &content, current, f.size).is_some())
    .map_or(current.size, |f| f.size);
  Some(Stretchable { current, content, max_size })
}

/// Re-encode |item| in a format of |size| bytes.  Returns false, leaving the
/// item alone, if there is no such format.
fn elongate<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, item: &mut CodeItem<F::Inst>,
  st: &Stretchable<F::Inst>, size: u32,
) -> bool {
  let format = match sized_format(catalog, &st.content, st.current, size) {
    Some(format) => format,
    None => return false,
  };
  let mut ixs = Bundle::new();
  let mut insns = vec![];
  for (ix, (insn, slot)) in st.content.instrs().into_iter().enumerate() {
    if let Some(slot) = slot {
      ixs.add_in_slot(slot, ix, func.opcode(&insn));
    }
    insns.push(insn);
  }
  trace!("elongate: {} -> {}", st.current.name, format.name);
  *item = CodeItem::Bundle {
    opcode: format.opcode,
    members: encode_members(func, catalog, format, &ixs, &insns),
  };
  true
}

/// One walk over the region's bundles, absorbing as much of |pad| as
/// possible.  When |crossing| is set a bundle may grow past |pad|, into the
/// next quantum.  Returns the remaining padding.
fn pad_pass<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, items: &mut [CodeItem<F::Inst>],
  mut pad: u32, crossing: bool,
) -> u32 {
  let quantum = catalog.alignment();
  for item in items.iter_mut() {
    if pad == 0 {
      break;
    }
    let st = match stretchable(func, catalog, item) {
      Some(st) => st,
      None => continue,
    };
    let size = st.current.size;
    let stretch = st.max_size - size;
    if stretch == 0 {
      continue;
    }
    if stretch < pad {
      if elongate(func, catalog, item, &st, st.max_size) {
        pad -= stretch;
      }
      continue;
    }
    if elongate(func, catalog, item, &st, size + pad) {
      return 0;
    }
    if crossing {
      for target in size + pad + 1..=st.max_size {
        if elongate(func, catalog, item, &st, target) {
          let over = target - size - pad;
          pad = (quantum - over % quantum) % quantum;
          break;
        }
      }
    } else {
      for target in (size + 1..size + pad).rev() {
        if elongate(func, catalog, item, &st, target) {
          pad -= target - size;
          break;
        }
      }
    }
  }
  pad
}

fn region_size<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, items: &[CodeItem<F::Inst>],
) -> u32 {
  items.iter().map(|item| item_size(func, catalog, item)).sum()
}

/// Pad one alignment region.  Returns false if no progress can be made.
fn align_region<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, items: &mut [CodeItem<F::Inst>],
) -> bool {
  let quantum = catalog.alignment();
  if quantum <= 1 {
    return true;
  }
  loop {
    let size = region_size(func, catalog, items);
    let pad = (quantum - size % quantum) % quantum;
    if pad == 0 {
      return true;
    }
    trace!("align_region: size {} pad {}", size, pad);
    let pad = pad_pass(func, catalog, items, pad, false);
    if pad != 0 {
      pad_pass(func, catalog, items, pad, true);
    }
    if region_size(func, catalog, items) == size {
      return false;
    }
  }
}

/// Pad every alignment region of |block|.  Formats must have been selected.
pub fn apply_alignment<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, block: &mut ScheduledBlock<F::Inst>,
) -> Result<(), SchedError> {
  let mut start = 0;
  let mut regions = 0;
  for ix in 0..block.items.len() {
    if !ends_alignment_region(func, &block.items[ix]) {
      continue;
    }
    if !align_region(func, catalog, &mut block.items[start..=ix]) {
      return Err(SchedError::Unalignable { block: block.block });
    }
    start = ix + 1;
    regions += 1;
  }
  if !align_region(func, catalog, &mut block.items[start..]) {
    return Err(SchedError::Unalignable { block: block.block });
  }
  debug!("apply_alignment: {:?}: {} regions", block.block, regions + 1);
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::bundle::test::*;
  use crate::data_structures::BlockIx;
  use crate::format_selector::select_formats;
  use crate::format_selector::test::{block_of, bundle, Ops};

  fn sizes(f: &Ops, cat: &TinyCatalog, items: &[CodeItem<(Opcode, u32)>]) -> Vec<u32> {
    items.iter().map(|i| item_size(f, cat, i)).collect()
  }

  // The non-nop members of every cycle, in slot order.
  fn contents(
    f: &Ops, cat: &TinyCatalog, items: &[CodeItem<(Opcode, u32)>],
  ) -> Vec<Vec<(Opcode, u32)>> {
    items
      .iter()
      .map(|item| match item {
        CodeItem::Bundle { opcode, members } => {
          let b = regroup_bundle(f, cat, *opcode, members).unwrap();
          let mut v: Vec<_> = b.instrs().into_iter().map(|(i, _)| i).collect();
          v.sort();
          v
        }
        CodeItem::Single(i) | CodeItem::Meta(i) => vec![*i],
      })
      .collect()
  }

  #[test]
  fn pads_each_region_to_the_quantum() {
    let cat = TinyCatalog::new();
    let f = Ops(vec![]);
    let mut b = block_of(vec![
      bundle(&[(ALU_OP, 1)]),
      bundle(&[(LD_OP, 2)]),
      CodeItem::Meta((META_OP, 3)),
      CodeItem::Single((CALL_OP, 4)),
      bundle(&[(ALU_OP, 5), (LD_OP, 6)]),
    ]);
    select_formats(&f, &cat, &mut b).unwrap();
    assert_eq!(sizes(&f, &cat, &b.items), vec![2, 4, 0, 4, 6]);
    let before = contents(&f, &cat, &b.items);
    apply_alignment(&f, &cat, &mut b).unwrap();
    let after = sizes(&f, &cat, &b.items);
    // The first region grows from 10 bytes by 4 + 2, the second from 6 by 10.
    assert_eq!(after, vec![6, 6, 0, 4, 16]);
    assert_eq!(contents(&f, &cat, &b.items), before);
  }

  #[test]
  fn nop_bundle_grows_like_an_empty_one() {
    let cat = TinyCatalog::new();
    let f = Ops(vec![]);
    let mut b = block_of(vec![bundle(&[])]);
    select_formats(&f, &cat, &mut b).unwrap();
    apply_alignment(&f, &cat, &mut b).unwrap();
    assert_eq!(
      b.items[0],
      CodeItem::Bundle {
        opcode: Opcode(105),
        members: vec![(NOP_ALU, 0), (NOP_LD, 0)]
      }
    );
  }

  #[test]
  fn standalone_region_and_repeated_alignment() {
    let cat = TinyCatalog::new();
    let f = Ops(vec![]);
    let mut b = block_of(vec![
      CodeItem::Single((CALL_OP, 1)),
      CodeItem::Single((CALL_OP, 2)),
    ]);
    // Each call closes a region of 4 bytes with nothing to stretch.
    assert_eq!(
      apply_alignment(&f, &cat, &mut b),
      Err(SchedError::Unalignable { block: BlockIx::new(0) })
    );

    let mut b = block_of(vec![bundle(&[(ALU_OP, 1), (LD_OP, 2)])]);
    select_formats(&f, &cat, &mut b).unwrap();
    apply_alignment(&f, &cat, &mut b).unwrap();
    let once = b.items.clone();
    apply_alignment(&f, &cat, &mut b).unwrap();
    assert_eq!(b.items, once);
  }

  #[test]
  fn stuck_region_is_reported() {
    let cat = TinyCatalog::new();
    let f = Ops(vec![]);
    // lng fits in at most 8 bytes.
    let mut b = block_of(vec![bundle(&[(LNG_S_OP, 1)])]);
    select_formats(&f, &cat, &mut b).unwrap();
    assert_eq!(
      apply_alignment(&f, &cat, &mut b),
      Err(SchedError::Unalignable { block: BlockIx::new(0) })
    );
  }
}
