//! Implements fuzzing primitives for everything.

use arbitrary::{Arbitrary, Result, Unstructured};

use crate::test_framework::{self as ir, *};
use vliwsched::{BlockIx, InstIx, Reg, TypedIxVec};

/// Upper bounds, to keep the fuzzed functions small enough to be scheduled
/// quickly.
const MAX_BLOCKS: u8 = 12;
const MAX_BLOCK_INSTS: u8 = 24;
const MAX_REGS: u8 = 16;

struct FuzzingEnv {
  num_blocks: u8,
  num_regs: u8,
  /// Registers written so far.  Operands are read from these when possible,
  /// so that the generated code has some dependences.
  defined: Vec<Reg>,
}

impl FuzzingEnv {
  fn block(&self, u: &mut Unstructured) -> Result<BlockIx> {
    Ok(BlockIx::new((u8::arbitrary(u)? % self.num_blocks) as u32))
  }

  fn label(&self, u: &mut Unstructured) -> Result<Label> {
    let bix = self.block(u)?;
    Ok(Label::Resolved { name: format!("b{}", bix.get()), bix })
  }

  fn def_reg(&mut self, u: &mut Unstructured) -> Result<Reg> {
    let reg = Reg::new((u8::arbitrary(u)? % self.num_regs) as u32);
    self.defined.push(reg);
    Ok(reg)
  }

  fn get_reg(&self, u: &mut Unstructured) -> Result<Reg> {
    if !self.defined.is_empty() && bool::arbitrary(u)? {
      let ix = usize::arbitrary(u)? % self.defined.len();
      return Ok(self.defined[ix]);
    }
    Ok(Reg::new((u8::arbitrary(u)? % self.num_regs) as u32))
  }

  fn inst(&mut self, u: &mut Unstructured) -> Result<Inst> {
    use Inst::*;

    const NUM_VARIANTS: u8 = 9;

    let inst = match u8::arbitrary(u)? % NUM_VARIANTS {
      0 => Alu {
        op: ir::AluOp::arbitrary(u)?,
        src_left: self.get_reg(u)?,
        src_right: self.get_reg(u)?,
        dst: self.def_reg(u)?,
      },
      1 => Mov { src: self.get_reg(u)?, dst: self.def_reg(u)? },
      2 => Imm { dst: self.def_reg(u)?, imm: i32::arbitrary(u)? },
      3 => Load { base: self.get_reg(u)?, dst: self.def_reg(u)? },
      4 => Store { base: self.get_reg(u)?, src: self.get_reg(u)? },
      5 => Mul {
        src_left: self.get_reg(u)?,
        src_right: self.get_reg(u)?,
        dst: self.def_reg(u)?,
      },
      6 => Call { callee: format!("f{}", u8::arbitrary(u)? % 4) },
      7 => Note { text: "fuzz".to_string() },
      8 => Alu {
        op: ir::AluOp::CmpLt,
        src_left: self.get_reg(u)?,
        src_right: self.get_reg(u)?,
        dst: self.def_reg(u)?,
      },
      x => {
        debug_assert!(x < NUM_VARIANTS, "update NUM_VARIANTS above");
        unreachable!()
      }
    };
    Ok(inst)
  }

  /// The last instruction of a block, if it has one.  None means falling
  /// through to the next block.
  fn inst_control_flow(
    &self, u: &mut Unstructured, cur_block: u8,
  ) -> Result<Option<Inst>> {
    use Inst::*;
    let last = cur_block + 1 == self.num_blocks;
    let inst = match u8::arbitrary(u)? % 5 {
      0 => GotoCTF {
        cond: self.get_reg(u)?,
        target_true: self.label(u)?,
        target_false: self.label(u)?,
      },
      // A single-block loop, the shape the loop handling cares about.
      1 if !last => GotoCTF {
        cond: self.get_reg(u)?,
        target_true: Label::Resolved {
          name: format!("b{}", cur_block),
          bix: BlockIx::new(cur_block as u32),
        },
        target_false: Label::Resolved {
          name: format!("b{}", cur_block + 1),
          bix: BlockIx::new(cur_block as u32 + 1),
        },
      },
      2 => Goto { target: self.label(u)? },
      3 if !last => return Ok(None),
      _ => {
        let reg =
          if bool::arbitrary(u)? { Some(self.get_reg(u)?) } else { None };
        Ret { reg }
      }
    };
    Ok(Some(inst))
  }
}

impl<'a> Arbitrary<'a> for Func {
  fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Func> {
    let num_regs = 1 + (u8::arbitrary(u)? % MAX_REGS);
    let num_blocks = 1 + (u8::arbitrary(u)? % MAX_BLOCKS);

    let mut env = FuzzingEnv { num_blocks, num_regs, defined: vec![] };

    let mut insts = TypedIxVec::new();
    let mut blocks = TypedIxVec::new();

    for cur_block in 0..num_blocks {
      let start = insts.len();

      let num_block_insts = u8::arbitrary(u)? % MAX_BLOCK_INSTS;
      for _ in 0..num_block_insts {
        insts.push(env.inst(u)?);
      }
      if let Some(inst) = env.inst_control_flow(u, cur_block)? {
        insts.push(inst);
      }

      let len = insts.len() - start;
      blocks.push(Block {
        name: format!("b{}", cur_block),
        start: InstIx::new(start),
        len,
      });
    }

    Ok(Func {
      name: "funk".to_string(),
      num_regs: num_regs as u32,
      insns: insts,
      blocks,
    })
  }
}
