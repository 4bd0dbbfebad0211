#![no_main]
use libfuzzer_sys::fuzz_target;

use vliwsched::analysis::CFGInfo;
use vliwsched::BlockIx;
use vsched::{self, test_framework as ir, validator};

fuzz_target!(|func: ir::Func| {
    if validator::validate(&func).is_err() {
        return;
    }

    let cfg = match CFGInfo::create(&func) {
        Ok(cfg) => cfg,
        Err(err) => panic!("cfg.rs: {}", err),
    };

    let n = func.blocks.len();
    for b in (0..n).map(BlockIx::new) {
        for s in cfg.succs(b) {
            assert!(cfg.preds(*s).contains(&b), "{:?} -> {:?} has no pred", b, s);
        }
        for p in cfg.preds(b) {
            assert!(cfg.succs(*p).contains(&b), "{:?} -> {:?} has no succ", p, b);
        }
    }

    // Every block is visited exactly once.
    let mut seen = vec![false; n as usize];
    for b in &cfg.post_ord {
        assert!(!seen[b.get() as usize], "{:?} visited twice", b);
        seen[b.get() as usize] = true;
    }
    assert!(seen.iter().all(|s| *s));
});
