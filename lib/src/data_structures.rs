/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Data structures for the whole crate.

use rustc_hash::FxHashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Index;
use std::ops::IndexMut;
use std::slice::{Iter, IterMut};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

//=============================================================================
// Maps

pub type Map<K, V> = FxHashMap<K, V>;

//=============================================================================
// Iteration boilerplate for entities.  The only purpose of this is to support
// constructions of the form
//
//   for ent in startEnt .dotdot( endPlus1Ent ) {
//   }

pub trait PlusN {
  fn plus_n(&self, n: usize) -> Self;
}

#[derive(Clone, Copy)]
pub struct Range<T> {
  first: T,
  len: usize,
}

impl<T: Copy + PartialOrd + PlusN> Range<T> {
  pub fn new(from: T, len: usize) -> Range<T> {
    Range { first: from, len }
  }
  pub fn len(&self) -> usize {
    self.len
  }
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
  pub fn contains(&self, t: T) -> bool {
    t >= self.first && t < self.first.plus_n(self.len)
  }
}

impl<T: Copy + PartialOrd + PlusN> IntoIterator for Range<T> {
  type Item = T;
  type IntoIter = MyIterator<T>;
  fn into_iter(self) -> Self::IntoIter {
    MyIterator { range: self, next: self.first }
  }
}

pub struct MyIterator<T> {
  range: Range<T>,
  next: T,
}
impl<T: Copy + PartialOrd + PlusN> Iterator for MyIterator<T> {
  type Item = T;
  fn next(&mut self) -> Option<Self::Item> {
    if self.next >= self.range.first.plus_n(self.range.len) {
      None
    } else {
      let res = Some(self.next);
      self.next = self.next.plus_n(1);
      res
    }
  }
}

//=============================================================================
// Vectors where both the index and element types can be specified (and at
// most 2^32-1 elems can be stored.  What if this overflows?)

pub struct TypedIxVec<TyIx, Ty> {
  vek: Vec<Ty>,
  ty_ix: PhantomData<TyIx>,
}

impl<TyIx, Ty> TypedIxVec<TyIx, Ty>
where
  TyIx: Copy + Eq + Ord + PlusN + Into<u32>,
{
  pub fn new() -> Self {
    Self { vek: Vec::new(), ty_ix: PhantomData::<TyIx> }
  }
  pub fn iter(&self) -> Iter<Ty> {
    self.vek.iter()
  }
  pub fn iter_mut(&mut self) -> IterMut<Ty> {
    self.vek.iter_mut()
  }
  pub fn len(&self) -> u32 {
    // FIXME what if this overflows?
    self.vek.len() as u32
  }
  pub fn is_empty(&self) -> bool {
    self.vek.is_empty()
  }
  pub fn push(&mut self, item: Ty) {
    // FIXME what if this overflows?
    self.vek.push(item);
  }
  pub fn elems(&self) -> &[Ty] {
    &self.vek[..]
  }
}

impl<TyIx, Ty: Clone> TypedIxVec<TyIx, Ty> {
  pub fn resize(&mut self, new_len: u32, value: Ty) {
    self.vek.resize(new_len as usize, value);
  }
}

impl<TyIx, Ty> Index<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  type Output = Ty;
  fn index(&self, ix: TyIx) -> &Ty {
    &self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> IndexMut<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  fn index_mut(&mut self, ix: TyIx) -> &mut Ty {
    &mut self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> Clone for TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
{
  fn clone(&self) -> Self {
    Self { vek: self.vek.clone(), ty_ix: PhantomData::<TyIx> }
  }
}

impl<TyIx, Ty: fmt::Debug> fmt::Debug for TypedIxVec<TyIx, Ty> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?}", self.vek)
  }
}

//=============================================================================

macro_rules! generate_boilerplate {
  ($TypeIx:ident, $PrintingPrefix:expr) => {
    #[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
    #[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
    pub struct $TypeIx(u32);
    impl $TypeIx {
      #[inline(always)]
      pub fn new(n: u32) -> Self {
        Self(n)
      }
      #[inline(always)]
      pub fn get(self) -> u32 {
        self.0
      }
      #[inline(always)]
      pub fn plus(self, delta: u32) -> $TypeIx {
        $TypeIx(self.0 + delta)
      }
      pub fn dotdot(&self, last_plus1: $TypeIx) -> Range<$TypeIx> {
        let len = (last_plus1.0 - self.0) as usize;
        Range::new(*self, len)
      }
    }
    impl fmt::Debug for $TypeIx {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $PrintingPrefix, &self.0)
      }
    }
    impl PlusN for $TypeIx {
      #[inline(always)]
      fn plus_n(&self, n: usize) -> Self {
        self.plus(n as u32)
      }
    }
    impl Into<u32> for $TypeIx {
      #[inline(always)]
      fn into(self) -> u32 {
        self.get()
      }
    }
  };
}

generate_boilerplate!(InstIx, "i");

generate_boilerplate!(BlockIx, "b");

generate_boilerplate!(SlotKind, "s");

//=============================================================================
// Opcodes.  The library never interprets an opcode by itself; it only hands
// them to the slot catalog and the scheduling model.

#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Opcode(pub u32);

impl fmt::Debug for Opcode {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "op{}", self.0)
  }
}

//=============================================================================
// Slot sets.  Bit i set means slot i is occupied.

pub type SlotBits = u64;

pub const MAX_SLOTS: usize = 64;

#[inline(always)]
pub fn slot_bit(slot: SlotKind) -> SlotBits {
  debug_assert!((slot.get() as usize) < MAX_SLOTS);
  1u64 << slot.get()
}

/// Iterate over the slots of a bitset, lowest ordinal first.
pub fn slots_of(bits: SlotBits) -> impl Iterator<Item = SlotKind> {
  (0..MAX_SLOTS as u32)
    .filter(move |i| bits & (1u64 << i) != 0)
    .map(SlotKind::new)
}

//=============================================================================
// Registers.  The scheduler only needs register identity for dependence
// analysis, so a register is just a number.

#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Reg(u32);

impl Reg {
  pub fn new(n: u32) -> Self {
    Reg(n)
  }
  pub fn get_index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Debug for Reg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "r{}", self.0)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn slot_bits_iteration() {
    let bits = slot_bit(SlotKind::new(0)) | slot_bit(SlotKind::new(5));
    let v: Vec<SlotKind> = slots_of(bits).collect();
    assert_eq!(v, vec![SlotKind::new(0), SlotKind::new(5)]);
    assert_eq!(slots_of(0).count(), 0);
  }

  #[test]
  fn typed_ranges() {
    let r = BlockIx::new(2).dotdot(BlockIx::new(5));
    assert_eq!(r.len(), 3);
    assert!(r.contains(BlockIx::new(4)));
    assert!(!r.contains(BlockIx::new(5)));
    let v: Vec<BlockIx> = r.into_iter().collect();
    assert_eq!(v, vec![BlockIx::new(2), BlockIx::new(3), BlockIx::new(4)]);
    assert_eq!(format!("{:?}", InstIx::new(7)), "i7");
  }
}
