/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The scheduled code of a block, one item per issue cycle plus the meta
//! instructions that ride along.

use log::trace;

use crate::bundle::Bundle;
use crate::data_structures::{BlockIx, InstIx, Opcode};
use crate::interblock::{BlockState, BlockType};
use crate::interface::{Function, SlotCatalog};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum CodeItem<I> {
  /// One issue cycle.  Until a format is selected, |opcode| is the catalog's
  /// bundle placeholder and |members| are in scheduling order.  Afterwards
  /// |opcode| is the format's and |members| follow the format's slots, with
  /// no-ops in the slots nothing else occupies.
  Bundle { opcode: Opcode, members: Vec<I> },
  /// An instruction issued on its own, without a slot.
  Single(I),
  /// A meta instruction.  Takes no cycle and no space.
  Meta(I),
}

impl<I> CodeItem<I> {
  /// Does this item occupy an issue cycle?
  pub fn is_cycle(&self) -> bool {
    match self {
      CodeItem::Bundle { .. } | CodeItem::Single(_) => true,
      CodeItem::Meta(_) => false,
    }
  }
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ScheduledBlock<I> {
  pub block: BlockIx,
  pub kind: BlockType,
  pub items: Vec<CodeItem<I>>,
}

impl<I> ScheduledBlock<I> {
  pub fn num_cycles(&self) -> u32 {
    self.items.iter().filter(|item| item.is_cycle()).count() as u32
  }
}

fn lower_bundle<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, bundle: &Bundle<InstIx>,
  out: &mut Vec<CodeItem<F::Inst>>,
) {
  let insn = |iix: InstIx| func.get_insn(iix).clone();
  if bundle.is_standalone() {
    out.push(CodeItem::Single(insn(bundle.instrs()[0].0)));
  } else {
    out.push(CodeItem::Bundle {
      opcode: catalog.bundle_opcode(),
      members: bundle.instrs().into_iter().map(|(iix, _)| insn(iix)).collect(),
    });
  }
  for iix in bundle.meta_instrs() {
    out.push(CodeItem::Meta(insn(*iix)));
  }
}

/// Turn the schedule of one block into its code stream.
pub fn lower_block<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, b: BlockIx, state: &BlockState,
) -> ScheduledBlock<F::Inst> {
  let mut items = vec![];
  for region in state.regions() {
    for bundle in region.bundles() {
      lower_bundle(func, catalog, bundle, &mut items);
    }
  }
  trace!("{:?}: {} items", b, items.len());
  ScheduledBlock { block: b, kind: state.kind, items }
}
