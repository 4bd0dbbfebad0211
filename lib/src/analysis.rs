/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Control-flow analysis results for a Func: predecessors, successors and
//! the postorder used to pick the scheduling order.

use log::debug;

use rustc_hash::FxHashSet;

use crate::data_structures::{BlockIx, TypedIxVec};
use crate::interface::{Function, SchedError};

// CFGInfo contains CFG-related info computed from a Func.
pub struct CFGInfo {
  // All these TypedIxVecs contain one element per Block in the Func.

  // Predecessor and successor maps.  Successors are kept in the order the
  // Func reports them, and may contain duplicates if the Func does.
  pub pred_map: TypedIxVec<BlockIx, Vec<BlockIx>>,
  pub succ_map: TypedIxVec<BlockIx, Vec<BlockIx>>,

  // Blocks in postorder of a depth-first walk from the entry, followed by
  // the unreachable ones.
  pub post_ord: Vec<BlockIx>,
}

impl CFGInfo {
  #[inline(never)]
  pub fn create<F: Function>(func: &F) -> Result<Self, SchedError> {
    let n_blocks = func.blocks().len() as u32;

    let mut succ_map = TypedIxVec::<BlockIx, Vec<BlockIx>>::new();
    for b in func.blocks() {
      let succs = func.block_succs(b);
      for s in succs.iter() {
        if s.get() >= n_blocks {
          return Err(SchedError::Analysis(format!(
            "block {:?} has out-of-range successor {:?}",
            b, s
          )));
        }
      }
      succ_map.push(succs);
    }

    // Now invert the mapping
    let mut pred_map = TypedIxVec::<BlockIx, Vec<BlockIx>>::new();
    pred_map.resize(n_blocks, Vec::new());
    for (src, dsts) in (0..).zip(succ_map.iter()) {
      for dst in dsts.iter() {
        pred_map[*dst].push(BlockIx::new(src));
      }
    }

    let entry = func.entry_block();
    if n_blocks > 0 && entry.get() >= n_blocks {
      return Err(SchedError::Analysis("entry block out of range".into()));
    }

    // Iterative DFS, so that deep CFGs don't overflow the stack.  Each stack
    // entry is a block and the index of the next successor to visit.
    let mut post_ord = Vec::<BlockIx>::new();
    let mut visited = TypedIxVec::<BlockIx, bool>::new();
    visited.resize(n_blocks, false);
    let mut roots: Vec<BlockIx> = Vec::new();
    if n_blocks > 0 {
      roots.push(entry);
    }
    roots.extend(func.blocks());
    for root in roots {
      if visited[root] {
        continue;
      }
      visited[root] = true;
      let mut stack = vec![(root, 0usize)];
      while let Some((bix, next)) = stack.pop() {
        if next < succ_map[bix].len() {
          stack.push((bix, next + 1));
          let succ = succ_map[bix][next];
          if !visited[succ] {
            visited[succ] = true;
            stack.push((succ, 0));
          }
        } else {
          post_ord.push(bix);
        }
      }
    }
    assert!(post_ord.len() == n_blocks as usize);

    for b in func.blocks() {
      debug!(
        "{:<3?}   preds {:<16?}  succs {:?}",
        b, pred_map[b], succ_map[b]
      );
    }

    Ok(CFGInfo { pred_map, succ_map, post_ord })
  }

  pub fn preds(&self, b: BlockIx) -> &[BlockIx] {
    &self.pred_map[b]
  }

  pub fn succs(&self, b: BlockIx) -> &[BlockIx] {
    &self.succ_map[b]
  }

  /// Distinct successors, in order of first appearance.
  pub fn unique_succs(&self, b: BlockIx) -> Vec<BlockIx> {
    let mut seen = FxHashSet::<BlockIx>::default();
    let mut res = vec![];
    for s in self.succ_map[b].iter() {
      if seen.insert(*s) {
        res.push(*s);
      }
    }
    res
  }

  /// Is |succ| the block laid out directly after |b|?
  pub fn is_layout_successor(&self, b: BlockIx, succ: BlockIx) -> bool {
    b.get() + 1 == succ.get()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::bundle::test::ALU_OP;
  use crate::interblock::test::Cfg;

  fn bix(n: u32) -> BlockIx {
    BlockIx::new(n)
  }

  #[test]
  fn duplicate_successors_and_unreachable_blocks() {
    // b0 -> {b1, b1}; b1 -> b2; b3 -> b2, and nothing reaches b3.
    let f = Cfg {
      insns: vec![ALU_OP; 4],
      blocks: vec![
        (0, 1, vec![1, 1]),
        (1, 1, vec![2]),
        (2, 1, vec![]),
        (3, 1, vec![2]),
      ],
      carried: vec![],
    };
    let cfg = CFGInfo::create(&f).unwrap();
    assert_eq!(cfg.succs(bix(0)).len(), 2);
    assert_eq!(cfg.unique_succs(bix(0)), vec![bix(1)]);
    assert!(cfg.unique_succs(bix(2)).is_empty());
    assert_eq!(cfg.preds(bix(2)), &[bix(1), bix(3)]);
    assert_eq!(cfg.post_ord, vec![bix(2), bix(1), bix(0), bix(3)]);
    assert!(cfg.is_layout_successor(bix(0), bix(1)));
    assert!(!cfg.is_layout_successor(bix(0), bix(2)));
  }

  #[test]
  fn out_of_range_successor() {
    let f = Cfg {
      insns: vec![ALU_OP],
      blocks: vec![(0, 1, vec![5])],
      carried: vec![],
    };
    match CFGInfo::create(&f) {
      Err(SchedError::Analysis(_)) => {}
      _ => panic!("accepted a successor out of range"),
    }
  }
}
