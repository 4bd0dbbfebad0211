#![no_main]
use libfuzzer_sys::fuzz_target;

use vliwsched::{
    self, BlockIx, BlockType, Bundle, CodeItem, Reg, SchedError, ScheduledBlock,
    SlotCatalog,
};
use vsched::test_framework::{self as ir, *};

fn make_inst(kind: u8, r: Reg) -> Inst {
    match kind % 10 {
        0 => i_add(r, r, r),
        1 => i_mov(r, r),
        2 => i_imm(r, -7),
        3 => i_imm(r, 7),
        4 => i_load(r, r),
        5 => i_store(r, r),
        6 => i_mul(r, r, r),
        7 => i_cmp_lt(r, r, r),
        8 => i_call("f"),
        _ => i_note("n"),
    }
}

// Pack arbitrary instructions into bundles the way the scheduler would, then
// select formats and align.  Every bundle must come back with its members.
fuzz_target!(|ops: Vec<(u8, bool)>| {
    let target = ir::make_target();
    let mut func = Func::new("bundles");
    let r = func.new_reg();
    let insns: Vec<Inst> = ops.iter().map(|(kind, _)| make_inst(*kind, r)).collect();
    func.block("b0", insns.clone());
    func.finish();

    let mut items = vec![];
    let mut cur: Bundle<Inst> = Bundle::new();
    let flush = |cur: &mut Bundle<Inst>, items: &mut Vec<CodeItem<Inst>>| {
        if !cur.is_empty() {
            let members = cur.instrs().into_iter().map(|(i, _)| i).collect();
            items.push(CodeItem::Bundle { opcode: target.bundle_opcode(), members });
            cur.clear();
        }
    };
    for (insn, (_, split)) in insns.iter().zip(ops.iter()) {
        let opcode = insn.opcode();
        if target.is_meta(opcode) {
            items.push(CodeItem::Meta(insn.clone()));
            continue;
        }
        if !target.is_supported_instruction(opcode) {
            flush(&mut cur, &mut items);
            items.push(CodeItem::Single(insn.clone()));
            continue;
        }
        if *split || !cur.can_add(&target, opcode) {
            flush(&mut cur, &mut items);
        }
        cur.add(&target, insn.clone(), opcode);
    }
    flush(&mut cur, &mut items);

    let mut block = ScheduledBlock { block: BlockIx::new(0), kind: BlockType::Regular, items };
    let before = block.clone();

    if let Err(err) = vliwsched::select_formats(&func, &target, &mut block) {
        panic!("bundle.rs: format selection failed: {}", err);
    }
    match vliwsched::apply_alignment(&func, &target, &mut block) {
        Ok(()) => {}
        Err(err @ SchedError::Unalignable { .. }) => panic!("bundle.rs: {}", err),
        Err(err) => panic!("bundle.rs: unexpected error {}", err),
    }

    assert_eq!(block.items.len(), before.items.len());
    for (after, before) in block.items.iter().zip(before.items.iter()) {
        match (after, before) {
            (
                CodeItem::Bundle { opcode, members },
                CodeItem::Bundle { members: orig, .. },
            ) => {
                let regrouped = vliwsched::regroup_bundle(&func, &target, *opcode, members)
                    .expect("bundle.rs: bundle doesn't match its format");
                let mut got: Vec<String> =
                    regrouped.instrs().iter().map(|(i, _)| format!("{:?}", i)).collect();
                let mut want: Vec<String> = orig.iter().map(|i| format!("{:?}", i)).collect();
                got.sort();
                want.sort();
                assert_eq!(got, want);
            }
            (a, b) => assert_eq!(a, b),
        }
    }
});
