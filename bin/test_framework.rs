/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

/// As part of this set of test cases, we define a toy VLIW target and a mini
/// IR, and implement the `SlotCatalog`, `SchedModel` and `Function` traits
/// for them so that we can use the scheduler's public interface.
use arbitrary::Arbitrary;
use serde::{Deserialize, Serialize};
use vliwsched::{
  itinerary_bounds, BlockIx, CodeItem, FieldSign, FuncUnits, Function,
  InstIx, InstRegUses, InstrStage, Itinerary, Map, MemAccess, Opcode,
  PacketFormats, Range, Reg, SchedModel, ScheduleResult, SlotCatalog,
  SlotInfo, SlotKind, TypedIxVec, VliwFormat,
};

use std::fmt;

//=============================================================================
// The toy target.  Six issue slots:
//
//   alu  scalar arithmetic and branches
//   mv   register moves (which may also use alu)
//   ld   loads
//   st   stores
//   vec  multiplies
//   lng  long immediates; never bundled with alu or mv
//
// Loads and multiplies share a write-back port two cycles after issue.

pub const ALU: u32 = 0;
pub const MV: u32 = 1;
pub const LD: u32 = 2;
pub const ST: u32 = 3;
pub const VEC: u32 = 4;
pub const LNG: u32 = 5;

pub fn slot(n: u32) -> SlotKind {
  SlotKind::new(n)
}

pub mod op {
  use vliwsched::Opcode;

  pub const ADD: Opcode = Opcode(1);
  pub const SUB: Opcode = Opcode(2);
  pub const AND: Opcode = Opcode(3);
  pub const CMP_LT: Opcode = Opcode(4);
  pub const MOV: Opcode = Opcode(5);
  pub const IMM_S: Opcode = Opcode(6);
  pub const IMM_U: Opcode = Opcode(7);
  pub const LOAD: Opcode = Opcode(8);
  pub const STORE: Opcode = Opcode(9);
  pub const MUL: Opcode = Opcode(10);
  pub const CALL: Opcode = Opcode(11);
  pub const GOTO: Opcode = Opcode(12);
  pub const GOTO_CTF: Opcode = Opcode(13);
  pub const RET: Opcode = Opcode(14);
  pub const NOTE: Opcode = Opcode(15);

  pub const NOP_ALU: Opcode = Opcode(20);
  pub const NOP_MV: Opcode = Opcode(21);
  pub const NOP_LD: Opcode = Opcode(22);
  pub const NOP_ST: Opcode = Opcode(23);
  pub const NOP_VEC: Opcode = Opcode(24);
  pub const NOP_LNG: Opcode = Opcode(25);

  pub const BUNDLE: Opcode = Opcode(99);
}

const FU_ALU: FuncUnits = 1 << 0;
const FU_LD: FuncUnits = 1 << 1;
const FU_ST: FuncUnits = 1 << 2;
const FU_VEC: FuncUnits = 1 << 3;
const FU_LNG: FuncUnits = 1 << 4;
const FU_WB: FuncUnits = 1 << 5;

/// Size of an instruction issued on its own.
pub const STANDALONE_SIZE: u32 = 16;

pub const FETCH_QUANTUM: u32 = 16;

pub struct ToyTarget {
  infos: Vec<SlotInfo>,
  formats: PacketFormats,
  alternatives: Map<Opcode, Vec<SlotKind>>,
  itineraries: Map<Opcode, Itinerary>,
  empty: Itinerary,
  pipeline_depth: u32,
  max_latency: u32,
}

fn formats() -> Vec<VliwFormat> {
  use FieldSign::*;
  let f = |opc: u32, name: &str, slots: &[u32], size: u32, sign: FieldSign| {
    let slots: Vec<SlotKind> = slots.iter().map(|s| slot(*s)).collect();
    VliwFormat::new(Opcode(opc), name, &slots, size, sign)
  };
  vec![
    f(100, "I16_ALU", &[ALU], 2, Neutral),
    f(101, "I32_MV", &[MV], 4, Neutral),
    f(102, "I32_LD", &[LD], 4, Neutral),
    f(103, "I32_ST", &[ST], 4, Neutral),
    f(104, "I48_LD_ALU", &[LD, ALU], 6, Neutral),
    f(105, "I48_LNG_S", &[LNG], 6, Signed),
    f(106, "I48_LNG_U", &[LNG], 6, Unsigned),
    f(107, "I64_LD_MV", &[LD, MV], 8, Neutral),
    f(108, "I64_LD_ST_ALU", &[LD, ST, ALU], 8, Neutral),
    f(109, "I80_VEC_LD_ST", &[VEC, LD, ST], 10, Neutral),
    f(110, "I96_LD_ST_MV_ALU", &[LD, ST, MV, ALU], 12, Neutral),
    f(111, "I112_VEC_LD_ST_MV", &[VEC, LD, ST, MV], 14, Neutral),
    f(112, "I128_FULL", &[VEC, LD, ST, MV, ALU], 16, Neutral),
    f(113, "I128_LNG_LD_ST", &[LNG, LD, ST], 16, Neutral),
  ]
}

pub fn make_target() -> ToyTarget {
  let infos = vec![
    SlotInfo::new(slot(ALU), "alu", 16, op::NOP_ALU),
    SlotInfo::new(slot(MV), "mv", 16, op::NOP_MV),
    SlotInfo::new(slot(LD), "ld", 32, op::NOP_LD),
    SlotInfo::new(slot(ST), "st", 32, op::NOP_ST),
    SlotInfo::new(slot(VEC), "vec", 48, op::NOP_VEC),
    SlotInfo::new(slot(LNG), "lng", 48, op::NOP_LNG),
  ];

  let mut alternatives = Map::default();
  for opc in &[op::ADD, op::SUB, op::AND, op::CMP_LT, op::GOTO, op::GOTO_CTF]
  {
    alternatives.insert(*opc, vec![slot(ALU)]);
  }
  alternatives.insert(op::RET, vec![slot(ALU)]);
  alternatives.insert(op::MOV, vec![slot(MV), slot(ALU)]);
  alternatives.insert(op::IMM_S, vec![slot(LNG)]);
  alternatives.insert(op::IMM_U, vec![slot(LNG)]);
  alternatives.insert(op::LOAD, vec![slot(LD)]);
  alternatives.insert(op::STORE, vec![slot(ST)]);
  alternatives.insert(op::MUL, vec![slot(VEC)]);
  for info in &infos {
    alternatives.insert(info.nop_opcode, vec![info.kind]);
  }

  let alu = Itinerary::new(&[InstrStage::new(1, FU_ALU)], 1);
  let mut itineraries = Map::default();
  for opc in &[op::ADD, op::SUB, op::AND, op::CMP_LT] {
    itineraries.insert(*opc, alu.clone());
  }
  for opc in &[op::GOTO, op::GOTO_CTF, op::RET] {
    itineraries.insert(*opc, alu.clone());
  }
  itineraries.insert(op::MOV, Itinerary::new(&[], 1));
  let lng = Itinerary::new(&[InstrStage::new(1, FU_LNG)], 1);
  itineraries.insert(op::IMM_S, lng.clone());
  itineraries.insert(op::IMM_U, lng);
  itineraries.insert(
    op::LOAD,
    Itinerary::new(
      &[InstrStage::new(1, FU_LD).then(2), InstrStage::new(1, FU_WB)],
      3,
    )
    .with_memory_latency(3),
  );
  itineraries.insert(
    op::STORE,
    Itinerary::new(&[InstrStage::new(1, FU_ST)], 1).with_memory_latency(2),
  );
  itineraries.insert(
    op::MUL,
    Itinerary::new(
      &[InstrStage::new(1, FU_VEC).then(2), InstrStage::reserved(1, FU_WB)],
      3,
    ),
  );
  itineraries.insert(op::CALL, Itinerary::new(&[], 1));

  let (pipeline_depth, max_latency) = itinerary_bounds(itineraries.values());
  ToyTarget {
    infos,
    formats: PacketFormats::new(formats()),
    alternatives,
    itineraries,
    empty: Itinerary::default(),
    pipeline_depth,
    max_latency,
  }
}

impl SlotCatalog for ToyTarget {
  fn num_slots(&self) -> usize {
    self.infos.len()
  }
  fn slot_alternatives(&self, opcode: Opcode) -> &[SlotKind] {
    self.alternatives.get(&opcode).map_or(&[], |v| v.as_slice())
  }
  fn slot_info(&self, slot: SlotKind) -> &SlotInfo {
    &self.infos[slot.get() as usize]
  }
  fn formats(&self) -> &PacketFormats {
    &self.formats
  }
  fn is_meta(&self, opcode: Opcode) -> bool {
    opcode == op::NOTE
  }
  fn bundle_opcode(&self) -> Opcode {
    op::BUNDLE
  }
  fn standalone_size(&self, _opcode: Opcode) -> u32 {
    STANDALONE_SIZE
  }
  fn sign_hint(&self, opcode: Opcode) -> Option<FieldSign> {
    match opcode {
      op::IMM_S => Some(FieldSign::Signed),
      op::IMM_U => Some(FieldSign::Unsigned),
      _ => None,
    }
  }
  fn alignment(&self) -> u32 {
    FETCH_QUANTUM
  }
}

impl SchedModel for ToyTarget {
  fn itinerary(&self, opcode: Opcode) -> &Itinerary {
    self.itineraries.get(&opcode).unwrap_or(&self.empty)
  }
  fn pipeline_depth(&self) -> u32 {
    self.pipeline_depth
  }
  fn max_latency(&self) -> u32 {
    self.max_latency
  }
}

//=============================================================================
// Definition of: Label, AluOp and Inst (instructions).  Destinations are on
// the left.

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum Label {
  Unresolved { name: String },
  Resolved { name: String, bix: BlockIx },
}

impl fmt::Debug for Label {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Label::Unresolved { name } => write!(fmt, "??:{}", &name),
      Label::Resolved { name, bix } => write!(fmt, "{:?}:{}", bix, name),
    }
  }
}

impl Label {
  pub fn block(&self) -> BlockIx {
    match self {
      Label::Resolved { bix, .. } => *bix,
      Label::Unresolved { name } => {
        panic!("Label::block: unresolved label {}", name)
      }
    }
  }
}

#[derive(Copy, Clone, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub enum AluOp {
  Add,
  Sub,
  And,
  CmpLt,
}

impl AluOp {
  fn opcode(self) -> Opcode {
    match self {
      AluOp::Add => op::ADD,
      AluOp::Sub => op::SUB,
      AluOp::And => op::AND,
      AluOp::CmpLt => op::CMP_LT,
    }
  }
}

impl fmt::Debug for AluOp {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    let name = match self {
      AluOp::Add => "add",
      AluOp::Sub => "sub",
      AluOp::And => "and",
      AluOp::CmpLt => "cmplt",
    };
    write!(fmt, "{}", name)
  }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum Inst {
  Alu { op: AluOp, dst: Reg, src_left: Reg, src_right: Reg },
  Mov { dst: Reg, src: Reg },
  Imm { dst: Reg, imm: i32 },
  Load { dst: Reg, base: Reg },
  Store { base: Reg, src: Reg },
  Mul { dst: Reg, src_left: Reg, src_right: Reg },
  Call { callee: String },
  Goto { target: Label },
  GotoCTF { cond: Reg, target_true: Label, target_false: Label },
  Ret { reg: Option<Reg> },
  Note { text: String },
  Nop { opcode: Opcode },
}

pub fn i_add(dst: Reg, src_left: Reg, src_right: Reg) -> Inst {
  Inst::Alu { op: AluOp::Add, dst, src_left, src_right }
}
pub fn i_sub(dst: Reg, src_left: Reg, src_right: Reg) -> Inst {
  Inst::Alu { op: AluOp::Sub, dst, src_left, src_right }
}
pub fn i_and(dst: Reg, src_left: Reg, src_right: Reg) -> Inst {
  Inst::Alu { op: AluOp::And, dst, src_left, src_right }
}
pub fn i_cmp_lt(dst: Reg, src_left: Reg, src_right: Reg) -> Inst {
  Inst::Alu { op: AluOp::CmpLt, dst, src_left, src_right }
}
pub fn i_mov(dst: Reg, src: Reg) -> Inst {
  Inst::Mov { dst, src }
}
pub fn i_imm(dst: Reg, imm: i32) -> Inst {
  Inst::Imm { dst, imm }
}
pub fn i_load(dst: Reg, base: Reg) -> Inst {
  Inst::Load { dst, base }
}
pub fn i_store(base: Reg, src: Reg) -> Inst {
  Inst::Store { base, src }
}
pub fn i_mul(dst: Reg, src_left: Reg, src_right: Reg) -> Inst {
  Inst::Mul { dst, src_left, src_right }
}
pub fn i_call(callee: &str) -> Inst {
  Inst::Call { callee: callee.to_string() }
}
pub fn i_goto(target: &str) -> Inst {
  Inst::Goto { target: Label::Unresolved { name: target.to_string() } }
}
pub fn i_goto_ctf(cond: Reg, target_true: &str, target_false: &str) -> Inst {
  Inst::GotoCTF {
    cond,
    target_true: Label::Unresolved { name: target_true.to_string() },
    target_false: Label::Unresolved { name: target_false.to_string() },
  }
}
pub fn i_ret(reg: Option<Reg>) -> Inst {
  Inst::Ret { reg }
}
pub fn i_note(text: &str) -> Inst {
  Inst::Note { text: text.to_string() }
}

impl fmt::Debug for Inst {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Inst::Alu { op, dst, src_left, src_right } => {
        write!(fmt, "{:?} {:?}, {:?}, {:?}", op, dst, src_left, src_right)
      }
      Inst::Mov { dst, src } => write!(fmt, "mov {:?}, {:?}", dst, src),
      Inst::Imm { dst, imm } => write!(fmt, "imm {:?}, {}", dst, imm),
      Inst::Load { dst, base } => write!(fmt, "load {:?}, [{:?}]", dst, base),
      Inst::Store { base, src } => {
        write!(fmt, "store [{:?}], {:?}", base, src)
      }
      Inst::Mul { dst, src_left, src_right } => {
        write!(fmt, "mul {:?}, {:?}, {:?}", dst, src_left, src_right)
      }
      Inst::Call { callee } => write!(fmt, "call {}", callee),
      Inst::Goto { target } => write!(fmt, "goto {:?}", target),
      Inst::GotoCTF { cond, target_true, target_false } => write!(
        fmt,
        "if {:?} then {:?} else {:?}",
        cond, target_true, target_false
      ),
      Inst::Ret { reg: Some(reg) } => write!(fmt, "ret {:?}", reg),
      Inst::Ret { reg: None } => write!(fmt, "ret"),
      Inst::Note { text } => write!(fmt, "; {}", text),
      Inst::Nop { opcode } => write!(fmt, "nop.{:?}", opcode),
    }
  }
}

impl Inst {
  pub fn opcode(&self) -> Opcode {
    match self {
      Inst::Alu { op, .. } => op.opcode(),
      Inst::Mov { .. } => op::MOV,
      Inst::Imm { imm, .. } => {
        if *imm < 0 {
          op::IMM_S
        } else {
          op::IMM_U
        }
      }
      Inst::Load { .. } => op::LOAD,
      Inst::Store { .. } => op::STORE,
      Inst::Mul { .. } => op::MUL,
      Inst::Call { .. } => op::CALL,
      Inst::Goto { .. } => op::GOTO,
      Inst::GotoCTF { .. } => op::GOTO_CTF,
      Inst::Ret { .. } => op::RET,
      Inst::Note { .. } => op::NOTE,
      Inst::Nop { opcode } => *opcode,
    }
  }

  pub fn is_control_flow(&self) -> bool {
    match self {
      Inst::Goto { .. } | Inst::GotoCTF { .. } | Inst::Ret { .. } => true,
      _ => false,
    }
  }

  pub fn is_nop(&self) -> bool {
    match self {
      Inst::Nop { .. } => true,
      _ => false,
    }
  }

  pub fn targets(&self) -> Vec<BlockIx> {
    match self {
      Inst::Goto { target } => vec![target.block()],
      Inst::GotoCTF { target_true, target_false, .. } => {
        vec![target_true.block(), target_false.block()]
      }
      _ => vec![],
    }
  }

  /// Defined and used registers.
  pub fn reg_usage(&self) -> (Vec<Reg>, Vec<Reg>) {
    match self {
      Inst::Alu { dst, src_left, src_right, .. }
      | Inst::Mul { dst, src_left, src_right } => {
        (vec![*dst], vec![*src_left, *src_right])
      }
      Inst::Mov { dst, src } => (vec![*dst], vec![*src]),
      Inst::Imm { dst, .. } => (vec![*dst], vec![]),
      Inst::Load { dst, base } => (vec![*dst], vec![*base]),
      Inst::Store { base, src } => (vec![], vec![*base, *src]),
      Inst::GotoCTF { cond, .. } => (vec![], vec![*cond]),
      Inst::Ret { reg: Some(reg) } => (vec![], vec![*reg]),
      Inst::Call { .. }
      | Inst::Goto { .. }
      | Inst::Ret { reg: None }
      | Inst::Note { .. }
      | Inst::Nop { .. } => (vec![], vec![]),
    }
  }

  fn resolve<F: Fn(&str) -> BlockIx>(&mut self, lookup: F) {
    let resolve_label = |label: &mut Label| {
      let resolved = match label {
        Label::Unresolved { name } => {
          Label::Resolved { name: name.clone(), bix: lookup(name) }
        }
        Label::Resolved { .. } => panic!("Inst::resolve: already resolved"),
      };
      *label = resolved;
    };
    match self {
      Inst::Goto { target } => resolve_label(target),
      Inst::GotoCTF { target_true, target_false, .. } => {
        resolve_label(target_true);
        resolve_label(target_false);
      }
      _ => {}
    }
  }
}

//=============================================================================
// Definition of Block and Func, and printing thereof.

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
  pub name: String,
  pub start: InstIx,
  pub len: u32,
}

#[derive(Clone)]
pub struct Func {
  pub name: String,
  pub num_regs: u32,
  pub insns: TypedIxVec<InstIx, Inst>, // indexed by InstIx

  // Note that |blocks| must be in order of increasing |Block::start|
  // fields.  A block that doesn't end in a control flow instruction falls
  // through to the next one.
  pub blocks: TypedIxVec<BlockIx, Block>, // indexed by BlockIx
}

// Find a block Ix for a block name
fn lookup(blocks: &TypedIxVec<BlockIx, Block>, name: &str) -> BlockIx {
  match blocks.iter().position(|b| b.name == name) {
    Some(ix) => BlockIx::new(ix as u32),
    None => panic!("Func::lookup: can't resolve label name '{}'", name),
  }
}

impl Func {
  pub fn new(name: &str) -> Self {
    Func {
      name: name.to_string(),
      num_regs: 0,
      insns: TypedIxVec::new(),
      blocks: TypedIxVec::new(),
    }
  }

  // Get a new register.
  pub fn new_reg(&mut self) -> Reg {
    let r = Reg::new(self.num_regs);
    self.num_regs += 1;
    r
  }

  // Add a block to the Func.
  pub fn block(&mut self, name: &str, insns: Vec<Inst>) {
    let start = InstIx::new(self.insns.len());
    let len = insns.len() as u32;
    for insn in insns {
      self.insns.push(insn);
    }
    self.blocks.push(Block { name: name.to_string(), start, len });
  }

  // All blocks have been added.  Resolve labels and check that control flow
  // only ever ends a block.
  pub fn finish(&mut self) {
    for b in self.blocks.iter() {
      for i in 0..b.len {
        let insn = &self.insns[b.start.plus(i)];
        if i + 1 != b.len && insn.is_control_flow() {
          panic!("Func: block {} has control flow not at its end", b.name);
        }
      }
    }
    let blocks = &self.blocks;
    for insn in self.insns.iter_mut() {
      insn.resolve(|name| lookup(blocks, name));
    }
  }

  pub fn print(&self, who: &str) {
    println!("");
    println!("Func {}: name='{}' {{", who, self.name);
    for (ix, b) in self.blocks.iter().enumerate() {
      if ix > 0 {
        println!("");
      }
      println!("  {:?}:{}", BlockIx::new(ix as u32), b.name);
      for i in 0..b.len {
        let iix = b.start.plus(i);
        println!("      {:<3?}   {:?}", iix, self.insns[iix]);
      }
    }
    println!("}}");
  }

  pub fn print_schedule(
    &self, target: &ToyTarget, result: &ScheduleResult<Inst>,
  ) {
    println!("");
    println!("Schedule of '{}' {{", self.name);
    for (sched, stats) in result.blocks.iter().zip(result.stats.iter()) {
      println!(
        "  {:?}:{}  {:?}, {} cycles, {} entry nops",
        sched.block,
        self.blocks[sched.block].name,
        stats.kind,
        stats.cycles,
        stats.entry_nops
      );
      for item in &sched.items {
        match item {
          CodeItem::Bundle { opcode, members } => {
            let name = target
              .format_by_opcode(*opcode)
              .map_or("???", |f| f.name.as_str());
            println!("      {:<18} {:?}", name, members);
          }
          CodeItem::Single(insn) => println!("      {:<18} {:?}", "-", insn),
          CodeItem::Meta(insn) => println!("      {:<18} {:?}", "", insn),
        }
      }
    }
    println!("}} total {} cycles", result.total_cycles);
  }
}

impl Function for Func {
  type Inst = Inst;

  fn insns(&self) -> &[Inst] {
    self.insns.elems()
  }

  fn get_insn(&self, iix: InstIx) -> &Inst {
    &self.insns[iix]
  }

  fn blocks(&self) -> Range<BlockIx> {
    Range::new(BlockIx::new(0), self.blocks.len() as usize)
  }

  fn entry_block(&self) -> BlockIx {
    BlockIx::new(0)
  }

  fn block_insns(&self, block: BlockIx) -> Range<InstIx> {
    Range::new(self.blocks[block].start, self.blocks[block].len as usize)
  }

  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx> {
    let b = &self.blocks[block];
    if b.len > 0 {
      let last = &self.insns[b.start.plus(b.len - 1)];
      if last.is_control_flow() {
        return last.targets();
      }
    }
    // Fall through.
    if block.get() + 1 < self.blocks.len() {
      vec![block.plus(1)]
    } else {
      vec![]
    }
  }

  fn opcode(&self, insn: &Inst) -> Opcode {
    insn.opcode()
  }

  fn get_regs(&self, insn: &Inst) -> InstRegUses {
    let (defined, used) = insn.reg_usage();
    InstRegUses {
      used: used.into_iter().collect(),
      defined: defined.into_iter().collect(),
    }
  }

  fn mem_access(&self, insn: &Inst) -> MemAccess {
    match insn {
      Inst::Load { .. } => MemAccess::Load,
      Inst::Store { .. } => MemAccess::Store,
      Inst::Call { .. } => MemAccess::Barrier,
      _ => MemAccess::None,
    }
  }

  fn is_region_end(&self, insn: &Inst) -> bool {
    insn.is_control_flow() || insn.opcode() == op::CALL
  }

  fn is_alignment_boundary(&self, insn: &Inst) -> bool {
    match insn {
      Inst::Call { .. } | Inst::Ret { .. } => true,
      _ => false,
    }
  }

  fn gen_nop(&self, opcode: Opcode) -> Inst {
    Inst::Nop { opcode }
  }
}
