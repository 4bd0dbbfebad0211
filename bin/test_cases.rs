/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

/// Test cases.  The list of them is right at the bottom, function |find_func|.
/// Add new ones there.
use crate::test_framework::*;

/// A single block with loads, stores, a multiply and a note.
fn test_straight() -> Func {
  let mut func = Func::new("straight");
  let base = func.new_reg();
  let k = func.new_reg();
  let x = func.new_reg();
  let y = func.new_reg();
  let z = func.new_reg();

  func.block(
    "Lstart",
    vec![
      i_imm(base, 16),
      i_imm(k, -3),
      i_load(x, base),
      i_add(y, x, k),
      i_mul(z, y, y),
      i_store(base, z),
      i_note("done"),
      i_ret(Some(z)),
    ],
  );
  func.finish();
  func
}

/// If-then-else, with a fallthrough into the join block.
fn test_diamond() -> Func {
  let mut func = Func::new("diamond");
  let a = func.new_reg();
  let b = func.new_reg();
  let c = func.new_reg();
  let r = func.new_reg();
  let t = func.new_reg();

  func.block(
    "Lstart",
    vec![
      i_imm(a, 1),
      i_imm(b, 7),
      i_cmp_lt(c, a, b),
      i_goto_ctf(c, "Lthen", "Lelse"),
    ],
  );
  func.block("Lthen", vec![i_add(r, a, b), i_goto("Ljoin")]);
  func.block("Lelse", vec![i_sub(r, b, a), i_mov(t, r), i_and(r, t, b)]);
  func.block("Ljoin", vec![i_store(a, r), i_ret(Some(r))]);
  func.finish();
  func
}

/// A two-cycle loop whose load is still in flight when the loop exits.
fn test_latency_loop() -> Func {
  let mut func = Func::new("latency_loop");
  let v = func.new_reg();
  let p = func.new_reg();
  let c = func.new_reg();
  let end = func.new_reg();
  let q = func.new_reg();
  let one = func.new_reg();
  let s = func.new_reg();

  func.block(
    "Lstart",
    vec![i_imm(p, 64), i_imm(end, 128), i_imm(q, 256), i_imm(one, 1)],
  );
  func.block(
    "Lloop",
    vec![
      i_load(v, p),
      i_store(q, one),
      i_cmp_lt(c, p, end),
      i_goto_ctf(c, "Lloop", "Lexit"),
    ],
  );
  func.block("Lexit", vec![i_add(s, v, v), i_ret(Some(s))]);
  func.finish();
  func
}

/// A loop carrying a multiply into its own next iteration.
fn test_mul_chain() -> Func {
  let mut func = Func::new("mul_chain");
  let acc = func.new_reg();
  let f = func.new_reg();
  let c = func.new_reg();

  func.block("Lstart", vec![i_imm(acc, 1), i_imm(f, 3), i_imm(c, 1)]);
  func.block(
    "Lloop",
    vec![i_mul(acc, acc, f), i_goto_ctf(c, "Lloop", "Lexit")],
  );
  func.block("Lexit", vec![i_ret(Some(acc))]);
  func.finish();
  func
}

/// A long immediate next to an unrelated alu op: the two never share a
/// bundle.
fn test_exclusive_slots() -> Func {
  let mut func = Func::new("exclusive_slots");
  let x = func.new_reg();
  let y = func.new_reg();
  let z = func.new_reg();
  let k = func.new_reg();

  func.block(
    "Lstart",
    vec![i_add(x, y, z), i_imm(k, -5), i_and(y, k, k), i_ret(Some(x))],
  );
  func.finish();
  func
}

/// Calls split the block into several regions.
fn test_calls() -> Func {
  let mut func = Func::new("calls");
  let a = func.new_reg();
  let b = func.new_reg();
  let c = func.new_reg();
  let d = func.new_reg();

  func.block(
    "Lstart",
    vec![
      i_imm(a, 1),
      i_add(b, a, a),
      i_call("f"),
      i_load(c, b),
      i_note("between calls"),
      i_call("g"),
      i_add(d, c, c),
      i_ret(Some(d)),
    ],
  );
  func.finish();
  func
}

/// Two loops back to back.  The first one exits into the second, which
/// has another predecessor, so only the second one is a loop with an
/// epilogue.
fn test_two_loops() -> Func {
  let mut func = Func::new("two_loops");
  let p = func.new_reg();
  let x = func.new_reg();
  let y = func.new_reg();
  let c = func.new_reg();
  let d = func.new_reg();

  func.block("Lstart", vec![i_imm(p, 8), i_imm(c, 1), i_imm(d, 0)]);
  func.block(
    "Lfirst",
    vec![i_load(x, p), i_add(p, p, x), i_goto_ctf(c, "Lfirst", "Lsecond")],
  );
  func.block(
    "Lsecond",
    vec![i_mul(y, x, x), i_store(p, y), i_goto_ctf(d, "Lsecond", "Lend")],
  );
  func.block("Lend", vec![i_ret(Some(y))]);
  func.finish();
  func
}

/// The loop's exit block is empty and falls through to the real tail.
fn test_empty_epilogue() -> Func {
  let mut func = Func::new("empty_epilogue");
  let v = func.new_reg();
  let p = func.new_reg();
  let c = func.new_reg();

  func.block("Lstart", vec![i_imm(p, 32), i_imm(c, 1)]);
  func.block("Lloop", vec![i_load(v, p), i_goto_ctf(c, "Lloop", "Lexit")]);
  func.block("Lexit", vec![]);
  func.block("Ltail", vec![i_add(p, v, p), i_ret(Some(p))]);
  func.finish();
  func
}

/// Long immediates of both signs, alone and bundled with memory accesses.
fn test_signed_imm() -> Func {
  let mut func = Func::new("signed_imm");
  let m = func.new_reg();
  let n = func.new_reg();
  let v = func.new_reg();
  let w = func.new_reg();
  let base = func.new_reg();

  func.block(
    "Lstart",
    vec![
      i_imm(m, -1),
      i_load(v, base),
      i_imm(n, 1),
      i_store(base, v),
      i_load(w, base),
      i_ret(None),
    ],
  );
  func.finish();
  func
}

/// Loop whose body is nothing but the branch and some notes.
fn test_tiny_loop() -> Func {
  let mut func = Func::new("tiny_loop");
  let c = func.new_reg();

  func.block("Lstart", vec![i_imm(c, 0)]);
  func.block(
    "Lloop",
    vec![i_note("spin"), i_goto_ctf(c, "Lloop", "Lexit")],
  );
  func.block("Lexit", vec![i_note("out"), i_ret(None)]);
  func.finish();
  func
}

/// A loop whose body is split in two regions by a call.
fn test_call_loop() -> Func {
  let mut func = Func::new("call_loop");
  let v = func.new_reg();
  let p = func.new_reg();
  let one = func.new_reg();
  let end = func.new_reg();
  let c = func.new_reg();
  let s = func.new_reg();

  func.block(
    "Lstart",
    vec![i_imm(p, 0), i_imm(one, 4), i_imm(end, 64)],
  );
  func.block(
    "Lloop",
    vec![
      i_load(v, p),
      i_call("g"),
      i_add(p, p, one),
      i_cmp_lt(c, p, end),
      i_goto_ctf(c, "Lloop", "Lexit"),
    ],
  );
  func.block("Lexit", vec![i_add(s, v, p), i_ret(Some(s))]);
  func.finish();
  func
}

// This is the list of available tests.  This function returns either the
// requested Func, or if not found, a list of the available ones.
pub fn find_func(name: &str) -> Result<Func, Vec<String>> {
  // This is really stupid.  Fortunately it's not performance critical :)
  let all_funcs = vec![
    test_straight(),        // single block
    test_diamond(),         // if-then-else
    test_latency_loop(),    // loop with a load pending at exit
    test_mul_chain(),       // loop-carried latency
    test_exclusive_slots(), // lng vs alu
    test_calls(),           // several regions per block
    test_two_loops(),       // loop feeding a loop
    test_empty_epilogue(),  // empty exit block
    test_signed_imm(),      // format tie-break
    test_tiny_loop(),       // loop of one cycle
    test_call_loop(),       // loop of two regions
  ];

  let mut all_names = Vec::new();
  for cand in &all_funcs {
    all_names.push(cand.name.clone());
  }

  for cand in all_funcs {
    if cand.name == *name {
      return Ok(cand);
    }
  }

  all_names.sort();
  Err(all_names)
}

pub fn all_names() -> Vec<String> {
  find_func("").err().unwrap_or_default()
}
