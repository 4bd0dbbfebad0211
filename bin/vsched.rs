/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

mod fuzzing;
mod test_cases;
mod test_framework;
mod validator;

use test_framework::{make_target, Inst};
use vliwsched::{schedule_function, SchedOptions, ScheduleResult};

use clap;
use log::{self, error, info};
use pretty_env_logger;

use std::fs::File;
use std::io::BufWriter;

//=============================================================================
// Top level

fn main() {
  pretty_env_logger::init();

  let app = clap::App::new("vliwsched-util")
    .about("a simple program to allow separate testing of vliwsched")
    .arg(
      clap::Arg::new("test")
        .short('t')
        .takes_value(true)
        .required(true)
        .help("test case name"),
    )
    .arg(
      clap::Arg::new("no-interblock")
        .long("no-interblock")
        .help("ignore the successors' schedules at block ends"),
    )
    .arg(
      clap::Arg::new("no-loops")
        .long("no-loops")
        .help("don't treat single-block loops specially"),
    )
    .arg(
      clap::Arg::new("latency-margin")
        .long("latency-margin")
        .takes_value(true)
        .help("latency of every edge to a block exit"),
    )
    .arg(
      clap::Arg::new("epilogue-analysis")
        .long("epilogue-analysis")
        .help("derive epilogue nops from the epilogue's own schedule"),
    )
    .arg(
      clap::Arg::new("skip-alignment")
        .long("skip-alignment")
        .help("don't pad the code to the fetch quantum"),
    )
    .arg(
      clap::Arg::new("dump")
        .long("dump")
        .takes_value(true)
        .help("write the schedule to this file, bincode-encoded"),
    );
  let matches = app.get_matches();

  let func_name = matches.value_of("test").unwrap();
  let func = match crate::test_cases::find_func(func_name) {
    Ok(func) => func,
    Err(available_func_names) => {
      error!("can't find Func with name '{}'", func_name);
      println!("available func names are:");
      for name in available_func_names {
        println!("     {}", name);
      }
      return;
    }
  };

  let latency_margin = match matches.value_of("latency-margin") {
    None => None,
    Some(value) => match value.parse::<u32>() {
      Ok(margin) => Some(margin),
      Err(_) => {
        println!("invalid latency margin: {}", value);
        return;
      }
    },
  };

  let opts = SchedOptions {
    interblock_scoreboard: !matches.is_present("no-interblock"),
    loop_aware: !matches.is_present("no-loops"),
    latency_margin,
    epilogue_analysis: matches.is_present("epilogue-analysis"),
    skip_alignment: matches.is_present("skip-alignment"),
  };
  info!("options: {:?}", opts);

  let target = make_target();

  if let Err(err) = validator::validate(&func) {
    println!("invalid test function: {}", err);
    return;
  }
  func.print("before scheduling");

  let result = match schedule_function(&func, &target, &target, &opts) {
    Err(e) => {
      println!("scheduling failed: {}", e);
      return;
    }
    Ok(r) => r,
  };

  func.print_schedule(&target, &result);

  if let Err(err) = validator::check_schedule(&func, &target, &opts, &result)
  {
    println!("invalid schedule: {}", err);
    return;
  }

  if let Some(path) = matches.value_of("dump") {
    if let Err(err) = dump(path, &result) {
      println!("can't write {}: {}", path, err);
    }
  }
}

fn dump(path: &str, result: &ScheduleResult<Inst>) -> Result<(), String> {
  let file = File::create(path).map_err(|e| e.to_string())?;
  bincode::serialize_into(BufWriter::new(file), result)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod test_utils {
  use super::*;
  use crate::test_framework::{op, Func, ToyTarget};
  use vliwsched::{CodeItem, FieldSign, SlotCatalog};

  /// Schedule |func| and check the result.
  fn run_and_check(
    func: &Func, target: &ToyTarget, opts: &SchedOptions,
  ) -> Result<ScheduleResult<Inst>, String> {
    validator::validate(func)?;
    let result = schedule_function(func, target, target, opts)
      .map_err(|e| format!("scheduling failed: {}", e))?;
    validator::check_schedule(func, target, opts, &result)?;
    Ok(result)
  }

  pub fn check(func_name: &str, opts: &SchedOptions) -> ScheduleResult<Inst> {
    let _ = pretty_env_logger::try_init();
    let func = test_cases::find_func(func_name).unwrap();
    let target = make_target();
    run_and_check(&func, &target, opts).unwrap_or_else(|err| {
      func.print(func_name);
      panic!("{}: {}", func_name, err);
    })
  }

  pub fn check_all_options(func_name: &str) {
    let variants = vec![
      SchedOptions::default(),
      SchedOptions { interblock_scoreboard: false, ..Default::default() },
      SchedOptions { loop_aware: false, ..Default::default() },
      SchedOptions { latency_margin: Some(2), ..Default::default() },
      SchedOptions { epilogue_analysis: true, ..Default::default() },
      SchedOptions { skip_alignment: true, ..Default::default() },
    ];
    for opts in &variants {
      check(func_name, opts);
    }
  }

  /// Every long immediate sits in a format whose field sign agrees with it.
  pub fn check_imm_signs(result: &ScheduleResult<Inst>) -> usize {
    let target = make_target();
    let mut seen = 0;
    for sched in &result.blocks {
      for item in &sched.items {
        let (opcode, members) = match item {
          CodeItem::Bundle { opcode, members } => (opcode, members),
          _ => continue,
        };
        let format = target.format_by_opcode(*opcode).unwrap();
        for insn in members {
          let wanted = match insn.opcode() {
            op::IMM_S => FieldSign::Signed,
            op::IMM_U => FieldSign::Unsigned,
            _ => continue,
          };
          assert!(
            format.sign == wanted || format.sign == FieldSign::Neutral,
            "{:?} encoded in {}",
            insn,
            format.name
          );
          seen += 1;
        }
      }
    }
    seen
  }
}

#[test]
fn straight() {
  test_utils::check_all_options("straight");
}

#[test]
fn diamond() {
  test_utils::check_all_options("diamond");
}

#[test]
fn calls() {
  test_utils::check_all_options("calls");
  let result = test_utils::check("calls", &SchedOptions::default());
  // The calls are issued on their own.
  let singles = result.blocks[0]
    .items
    .iter()
    .filter(|item| match item {
      vliwsched::CodeItem::Single(_) => true,
      _ => false,
    })
    .count();
  assert_eq!(singles, 2);
}

#[test]
fn latency_loop() {
  use vliwsched::BlockType;
  test_utils::check_all_options("latency_loop");

  let result = test_utils::check("latency_loop", &SchedOptions::default());
  let (lp, epi) = (&result.stats[1], &result.stats[2]);
  assert_eq!(lp.kind, BlockType::Loop);
  assert_eq!(epi.kind, BlockType::Epilogue);
  assert_eq!(lp.cycles, 2);
  // Nothing in the loop reads the load's result, so the loop converges on
  // its first pass and the pending load is left to the epilogue.
  assert_eq!(lp.iterations, 0);
  assert_eq!(lp.latency_margin, 0);
  assert!(lp.safety_margin >= 1);
  assert_eq!(epi.entry_nops, lp.safety_margin as u32);

  let analysed = test_utils::check(
    "latency_loop",
    &SchedOptions { epilogue_analysis: true, ..Default::default() },
  );
  assert!(analysed.stats[2].entry_nops >= 1);

  // Without loop handling nothing is padded.
  let plain = test_utils::check(
    "latency_loop",
    &SchedOptions { loop_aware: false, ..Default::default() },
  );
  assert_eq!(plain.stats[1].kind, BlockType::Regular);
  assert_eq!(plain.stats[2].entry_nops, 0);
}

#[test]
fn mul_chain() {
  use vliwsched::BlockType;
  test_utils::check_all_options("mul_chain");

  let result = test_utils::check("mul_chain", &SchedOptions::default());
  let lp = &result.stats[1];
  assert_eq!(lp.kind, BlockType::Loop);
  // The multiply feeds itself across the back edge, so the first pass
  // fails and the margin is raised until the result is in time.
  assert!(lp.latency_margin >= 3);
  assert!(lp.iterations >= 3);
  assert!(lp.cycles >= 3);
}

#[test]
fn exclusive_slots() {
  test_utils::check_all_options("exclusive_slots");
  let result = test_utils::check(
    "exclusive_slots",
    &SchedOptions { skip_alignment: true, ..Default::default() },
  );
  assert_eq!(test_utils::check_imm_signs(&result), 1);
  // The immediate needs a cycle of its own.
  assert!(result.stats[0].cycles >= 3);
}

#[test]
fn two_loops() {
  use vliwsched::BlockType;
  test_utils::check_all_options("two_loops");
  let result = test_utils::check("two_loops", &SchedOptions::default());
  let kinds: Vec<BlockType> = result.stats.iter().map(|s| s.kind).collect();
  assert_eq!(
    kinds,
    vec![
      BlockType::Regular,
      BlockType::Regular,
      BlockType::Loop,
      BlockType::Epilogue
    ]
  );
}

#[test]
fn empty_epilogue() {
  use vliwsched::BlockType;
  test_utils::check_all_options("empty_epilogue");
  for opts in &[
    SchedOptions::default(),
    SchedOptions { epilogue_analysis: true, ..Default::default() },
  ] {
    let result = test_utils::check("empty_epilogue", opts);
    assert_eq!(result.stats[2].kind, BlockType::Epilogue);
    // An empty epilogue waits for the loop's whole safety margin.
    assert_eq!(
      result.stats[2].entry_nops,
      result.stats[1].safety_margin as u32
    );
    assert_eq!(result.stats[2].cycles, result.stats[2].entry_nops);
  }
}

#[test]
fn signed_imm() {
  test_utils::check_all_options("signed_imm");
  for opts in &[
    SchedOptions::default(),
    SchedOptions { skip_alignment: true, ..Default::default() },
  ] {
    let result = test_utils::check("signed_imm", opts);
    assert_eq!(test_utils::check_imm_signs(&result), 2);
  }
}

#[test]
fn tiny_loop() {
  use vliwsched::BlockType;
  test_utils::check_all_options("tiny_loop");
  let result = test_utils::check("tiny_loop", &SchedOptions::default());
  assert_eq!(result.stats[1].kind, BlockType::Loop);
  assert_eq!(result.stats[1].cycles, 1);
  assert_eq!(result.stats[2].entry_nops, 0);
}

#[test]
fn call_loop() {
  use vliwsched::{BlockType, CodeItem};
  test_utils::check_all_options("call_loop");
  let result = test_utils::check("call_loop", &SchedOptions::default());
  assert_eq!(result.stats[1].kind, BlockType::Loop);
  assert_eq!(result.stats[2].kind, BlockType::Epilogue);
  // The call stays in the loop, issued on its own.
  let calls = result.blocks[1]
    .items
    .iter()
    .filter(|item| match item {
      CodeItem::Single(insn) => insn.opcode() == test_framework::op::CALL,
      _ => false,
    })
    .count();
  assert_eq!(calls, 1);
  // Both regions of the loop come before the branch.
  assert!(result.stats[1].cycles >= 4);
}

#[test]
fn all_cases_are_listed() {
  let names = test_cases::all_names();
  assert_eq!(names.len(), 11);
  for name in names {
    test_utils::check(&name, &SchedOptions::default());
  }
}

#[test]
fn edge_latencies_are_checked() {
  use vliwsched::{BlockIx, CodeItem};
  let opts = SchedOptions {
    epilogue_analysis: true,
    skip_alignment: true,
    ..Default::default()
  };
  let mut result = test_utils::check("latency_loop", &opts);

  // Without its entry nops the epilogue reads the loop's load too early.
  let epi = &mut result.blocks[2];
  let before = epi.items.len();
  epi.items.retain(|item| match item {
    CodeItem::Bundle { members, .. } => !members.iter().all(|i| i.is_nop()),
    _ => true,
  });
  let removed = (before - epi.items.len()) as u32;
  assert!(removed >= 1);
  result.stats[2].cycles -= removed;
  result.total_cycles -= removed;

  let func = test_cases::find_func("latency_loop").unwrap();
  let err =
    validator::check_schedule(&func, &make_target(), &opts, &result)
      .unwrap_err();
  let edge = format!("{:?} -> {:?}:", BlockIx::new(1), BlockIx::new(2));
  assert!(err.starts_with(&edge), "{}", err);
}

#[test]
fn dump_round_trips() {
  let result = test_utils::check("diamond", &SchedOptions::default());
  let bytes = bincode::serialize(&result).unwrap();
  let back: ScheduleResult<Inst> = bincode::deserialize(&bytes).unwrap();
  assert_eq!(back.total_cycles, result.total_cycles);
  assert_eq!(back.blocks.len(), result.blocks.len());
  for (a, b) in back.blocks.iter().zip(result.blocks.iter()) {
    assert_eq!(a.items, b.items);
  }
}
