#![no_main]
use libfuzzer_sys::fuzz_target;

use vliwsched::{self, SchedError, SchedOptions};
use vsched::{self, test_framework as ir, validator};

static mut COUNTER_GEN: usize = 0;
static mut COUNTER_OK: usize = 0;

fuzz_target!(|func: ir::Func| {
    let (num_gen, num_ok) = unsafe {
        COUNTER_GEN += 1;
        (COUNTER_GEN, COUNTER_OK)
    };

    println!(
        "=== status: #ok/#total: {}/{} == {} ",
        num_ok,
        num_gen,
        100.0 * (num_ok as f64) / (num_gen as f64)
    );

    if let Err(err) = validator::validate(&func) {
        panic!("fuzzing.rs generated an invalid function: {}", err);
    }

    let target = ir::make_target();
    let opts = SchedOptions::default();

    let result = match vliwsched::schedule_function(&func, &target, &target, &opts) {
        Ok(result) => {
            unsafe {
                COUNTER_OK += 1;
            }
            result
        }
        Err(err @ SchedError::NotConverged { .. }) | Err(err @ SchedError::Unalignable { .. }) => {
            func.print("failing func");
            panic!("schedule.rs: {}", err);
        }
        Err(err) => {
            println!("scheduling error: {}", err);
            return;
        }
    };

    if let Err(err) = validator::check_schedule(&func, &target, &opts, &result) {
        func.print("failing func");
        func.print_schedule(&target, &result);
        panic!("schedule.rs: invalid schedule: {}", err);
    }
});
