/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! This is the top level interface for the scheduling library.

use smallvec::SmallVec;
use std::fmt;

use crate::machine_scheduler;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

// Stuff that is defined by the library

// Maps of things.

pub use crate::data_structures::Map;

// Entities, and vectors indexed by them.

pub use crate::data_structures::TypedIxVec;
pub use crate::data_structures::{BlockIx, InstIx, Range};
pub use crate::data_structures::{
  slot_bit, slots_of, Opcode, Reg, SlotBits, SlotKind, MAX_SLOTS,
};

// Formats and bundles.

pub use crate::bundle::Bundle;
pub use crate::format::{FieldSign, PacketFormats, SlotInfo, VliwFormat};

// Timing model.

pub use crate::hazard::{
  itinerary_bounds, FuncUnits, HazardRecognizer, InstrStage, Itinerary,
  StageKind,
};
pub use crate::scoreboard::{FuncUnitCycle, ResourceCycle, ResourceScoreboard};

// Dependences, the coordinator and the scheduled code stream.

pub use crate::dependence::{DataDependenceGraph, DepEdge, DepKind, NodeIx};
pub use crate::emit::{CodeItem, ScheduledBlock};
pub use crate::interblock::{
  BlockState, BlockType, ConvergenceResult, FixedpointState,
  InterBlockScheduling, Region,
};

pub use crate::alignment::apply_alignment;
pub use crate::format_selector::{regroup_bundle, resolve_format, select_formats};

/// Register uses for a given instruction.
pub struct InstRegUses {
  pub used: SmallVec<[Reg; 4]>,    // registers that are read.
  pub defined: SmallVec<[Reg; 4]>, // registers that are written.
}

/// How an instruction touches memory, for dependence analysis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemAccess {
  None,
  Load,
  Store,
  /// Ordered against every other memory access, e.g. a call.
  Barrier,
}

impl MemAccess {
  pub fn may_load(self) -> bool {
    self == MemAccess::Load || self == MemAccess::Barrier
  }
  pub fn may_store(self) -> bool {
    self == MemAccess::Store || self == MemAccess::Barrier
  }
}

/// A trait defined by the scheduler client to provide access to its
/// machine-instruction / CFG representation.
pub trait Function {
  /// The scheduler is parameterized on F: Function and so can use the
  /// projected type F::Inst.
  type Inst: Clone + fmt::Debug;

  // -------------
  // CFG traversal
  // -------------

  /// Allow access to the underlying vector of instructions.
  fn insns(&self) -> &[Self::Inst];

  /// Get an instruction with a type-safe InstIx index.
  fn get_insn(&self, insn: InstIx) -> &Self::Inst {
    &self.insns()[insn.get() as usize]
  }

  /// Allow iteration over basic blocks (in layout order).
  fn blocks(&self) -> Range<BlockIx>;

  /// Get the index of the entry block.
  fn entry_block(&self) -> BlockIx;

  /// Provide the range of instruction indices contained in each block.
  fn block_insns(&self, block: BlockIx) -> Range<InstIx>;

  /// Get CFG successors for a given block.
  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx>;

  // --------------------------
  // Instruction properties
  // --------------------------

  fn opcode(&self, insn: &Self::Inst) -> Opcode;

  /// Provide the defined and used registers for an instruction.
  fn get_regs(&self, insn: &Self::Inst) -> InstRegUses;

  fn mem_access(&self, insn: &Self::Inst) -> MemAccess;

  /// Does this instruction close a scheduling region?  Terminators and calls
  /// do; they are always issued in the last cycle of their region.
  fn is_region_end(&self, insn: &Self::Inst) -> bool;

  /// Does the fetch-alignment region end after this instruction?
  fn is_alignment_boundary(&self, insn: &Self::Inst) -> bool;

  /// Generate a no-op with the given opcode, to fill an empty slot.
  fn gen_nop(&self, opcode: Opcode) -> Self::Inst;
}

/// The architecture's description of issue slots and formats.  Pure lookup,
/// no state.
pub trait SlotCatalog {
  fn num_slots(&self) -> usize;

  /// The slots an opcode may issue in, preferred one first.  Empty if the
  /// opcode has no known slot.
  fn slot_alternatives(&self, opcode: Opcode) -> &[SlotKind];

  fn is_supported_instruction(&self, opcode: Opcode) -> bool {
    !self.slot_alternatives(opcode).is_empty()
  }

  fn slot_kind(&self, opcode: Opcode) -> Option<SlotKind> {
    self.slot_alternatives(opcode).first().cloned()
  }

  fn slot_info(&self, slot: SlotKind) -> &SlotInfo;

  fn formats(&self) -> &PacketFormats;

  fn get_format(&self, slots: SlotBits) -> Option<&VliwFormat> {
    self.formats().get_format(slots)
  }

  fn get_format_by_size(
    &self, slots: SlotBits, size: u32,
  ) -> Option<&VliwFormat> {
    self.formats().get_format_by_size(slots, size)
  }

  fn format_by_opcode(&self, opcode: Opcode) -> Option<&VliwFormat> {
    self.formats().format_by_opcode(opcode)
  }

  /// Markers without hazard effect, e.g. lifetime markers.
  fn is_meta(&self, opcode: Opcode) -> bool;

  /// The generic placeholder opcode carried by a bundle before format
  /// selection.
  fn bundle_opcode(&self) -> Opcode;

  /// Encoded size of an instruction issued on its own.
  fn standalone_size(&self, opcode: Opcode) -> u32;

  /// Signedness required by the opcode's immediates, if it matters.
  fn sign_hint(&self, opcode: Opcode) -> Option<FieldSign>;

  /// Instruction-fetch alignment quantum, in bytes.
  fn alignment(&self) -> u32;

  fn is_nop(&self, opcode: Opcode) -> bool {
    (0..self.num_slots() as u32)
      .any(|s| self.slot_info(SlotKind::new(s)).nop_opcode == opcode)
  }
}

/// Per-opcode pipeline timing.
pub trait SchedModel {
  fn itinerary(&self, opcode: Opcode) -> &Itinerary;

  /// Number of cycles spanned by the deepest itinerary.
  fn pipeline_depth(&self) -> u32;

  /// The largest latency of any opcode, memory latencies included.
  fn max_latency(&self) -> u32;
}

//=============================================================================
// Options, errors and results.

#[derive(Clone, Debug)]
pub struct SchedOptions {
  /// Use the successors' schedules to decide which resources are occupied
  /// after a block's end.
  pub interblock_scoreboard: bool,
  /// Recognise single-block loops and their epilogues.
  pub loop_aware: bool,
  /// Override the latency of every edge to the region exit.
  pub latency_margin: Option<u32>,
  /// Compute epilogue entry nops from the actual epilogue schedule rather
  /// than from the loop's safety margin.
  pub epilogue_analysis: bool,
  pub skip_alignment: bool,
}

impl Default for SchedOptions {
  fn default() -> Self {
    Self {
      interblock_scoreboard: true,
      loop_aware: true,
      latency_margin: None,
      epilogue_analysis: false,
      skip_alignment: false,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedError {
  /// The loop's resource and latency demands couldn't be met by any margin.
  NotConverged { block: BlockIx, iterations: u32 },
  /// Several formats of the same size fit and no hint picks one.
  AmbiguousFormat { slots: SlotBits },
  /// The alignment pass could not pad a region.
  Unalignable { block: BlockIx },
  /// No legal region length was found.
  RegionOverflow { block: BlockIx },
  /// The CFG given by the client is malformed.
  Analysis(String),
}

impl fmt::Display for SchedError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      SchedError::NotConverged { block, iterations } => write!(
        fmt,
        "loop {:?} did not converge after {} iterations",
        block, iterations
      ),
      SchedError::AmbiguousFormat { slots } => {
        write!(fmt, "ambiguous format for slot set {:#x}", slots)
      }
      SchedError::Unalignable { block } => {
        write!(fmt, "can't align the code of block {:?}", block)
      }
      SchedError::RegionOverflow { block } => {
        write!(fmt, "no legal region length in block {:?}", block)
      }
      SchedError::Analysis(msg) => write!(fmt, "analysis error: {}", msg),
    }
  }
}

/// Per-block scheduling statistics.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BlockStats {
  pub kind: BlockType,
  pub iterations: u32,
  pub latency_margin: i32,
  pub resource_margin: i32,
  pub safety_margin: i32,
  pub entry_nops: u32,
  pub cycles: u32,
}

/// The result of scheduling a function.
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ScheduleResult<I> {
  /// The scheduled code of every block, in layout order.
  pub blocks: Vec<ScheduledBlock<I>>,
  pub stats: Vec<BlockStats>,
  pub total_cycles: u32,
}

/// Schedule all blocks of |func|, select a format for each bundle and align
/// the result.
#[inline(never)]
pub fn schedule_function<F: Function>(
  func: &F, catalog: &dyn SlotCatalog, model: &dyn SchedModel,
  opts: &SchedOptions,
) -> Result<ScheduleResult<F::Inst>, SchedError> {
  machine_scheduler::run(func, catalog, model, opts)
}
