#![no_main]
use libfuzzer_sys::fuzz_target;

use vsched::{self, test_framework as ir, validator};

fuzz_target!(|func: ir::Func| {
    if let Err(err) = validator::validate(&func) {
        func.print("invalid func");
        panic!("validator.rs: {}", err);
    }
});
