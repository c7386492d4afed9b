/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use rampart::datatype::AbstractDomain;
use rampart::datatype::Interval;
use rampart::instrument::analyze_procedure;
use rampart::instrument::instrument_procedure;
use rampart::instrument::Verdict;
use rampart::ir::BinOp;
use rampart::ir::CmpPred;
use rampart::ir::InstKind;
use rampart::ir::Operand;
use rampart::ir::Procedure;
use rampart::ir::Terminator;
use rampart::ir::Ty;
use rampart::ir::ValueId;
use test_log::test;

/// An access indexed by an unconstrained argument on a size-10 array.
fn unconstrained_access() -> (Procedure, ValueId, ValueId) {
    let mut proc = Procedure::new("test");
    let idx = proc.add_param("idx", Ty::Int);
    let bb0 = proc.add_block();
    let arr = proc.alloc_array(bb0, 10, "a");
    let access = proc.elem_ptr(bb0, arr, Operand::Value(idx));
    let loaded = proc.load(bb0, access);
    proc.set_terminator(
        bb0,
        Terminator::Ret {
            value: Some(Operand::Value(loaded)),
        },
    );
    (proc, idx, access)
}

#[test]
fn test_unconstrained_argument_needs_guard() {
    let (proc, _, access) = unconstrained_access();
    let decisions = analyze_procedure(&proc).expect("analysis");
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].access, access);
    assert_eq!(decisions[0].verdict, Verdict::NeedsGuard);
    assert_eq!(decisions[0].len, 10);
    assert!(decisions[0].index_range.is_top());
}

#[test]
fn test_inserted_guard_tests_both_bounds() {
    let (mut proc, idx, access) = unconstrained_access();
    let entry = proc.block_ids().next().expect("entry block");
    assert!(instrument_procedure(&mut proc).expect("instrumentation"));

    // entry + continuation + failure block.
    assert_eq!(proc.block_count(), 3);
    let Terminator::CondBr {
        cond: Operand::Value(cond),
        then_dest,
        else_dest,
    } = proc.terminator(entry).clone()
    else {
        panic!("guarded block must end in a conditional branch");
    };

    // The branch condition is (idx >= 0) AND (idx < 10).
    let Some(InstKind::Binary {
        op: BinOp::And,
        lhs: Operand::Value(low),
        rhs: Operand::Value(high),
    }) = proc.def_kind(cond)
    else {
        panic!("guard condition must combine both bound checks");
    };
    assert_eq!(
        proc.def_kind(*low),
        Some(&InstKind::Cmp {
            pred: CmpPred::Sge,
            lhs: Operand::Value(idx),
            rhs: Operand::Const(0),
        })
    );
    assert_eq!(
        proc.def_kind(*high),
        Some(&InstKind::Cmp {
            pred: CmpPred::Slt,
            lhs: Operand::Value(idx),
            rhs: Operand::Const(10),
        })
    );

    // The access now heads the continuation block; the failure block
    // returns the sentinel.
    assert_eq!(proc.position_of(access), Some((then_dest, 0)));
    assert_eq!(
        proc.terminator(else_dest),
        &Terminator::Ret {
            value: Some(Operand::Const(-1)),
        }
    );
}

#[test]
fn test_constant_indices_decide_exactly() {
    let mut proc = Procedure::new("constants");
    let bb0 = proc.add_block();
    let arr = proc.alloc_array(bb0, 10, "a");
    let safe = proc.elem_ptr(bb0, arr, Operand::Const(3));
    proc.store(bb0, Operand::Const(1), safe);
    let high = proc.elem_ptr(bb0, arr, Operand::Const(12));
    proc.store(bb0, Operand::Const(1), high);
    let negative = proc.elem_ptr(bb0, arr, Operand::Const(-1));
    proc.store(bb0, Operand::Const(1), negative);

    let decisions = analyze_procedure(&proc).expect("analysis");
    assert_eq!(decisions.len(), 3);
    assert_eq!(decisions[0].verdict, Verdict::Safe);
    assert_eq!(decisions[0].index_range, Interval::new(3, 3));
    assert_eq!(decisions[1].verdict, Verdict::NeedsGuard);
    assert_eq!(decisions[1].index_range, Interval::new(12, 12));
    assert_eq!(decisions[2].verdict, Verdict::NeedsGuard);

    assert!(instrument_procedure(&mut proc).expect("instrumentation"));
    // Two guards: each adds a continuation and a failure block.
    assert_eq!(proc.block_count(), 5);
    // Both guarded accesses were relocated to the head of their
    // continuation; the safe access was left alone in the entry block.
    let (_, at) = proc.position_of(high).expect("high access");
    assert_eq!(at, 0);
    let (_, at) = proc.position_of(negative).expect("negative access");
    assert_eq!(at, 0);
    let (block, _) = proc.position_of(safe).expect("safe access");
    assert_eq!(block, proc.block_ids().next().expect("entry block"));
}

/// for (i = 0; i < 10; i++) a[i] = 1; every in-loop access is provably
/// safe even though the raw counter widened, because the loop guard
/// re-establishes the bound on the body edge.
#[test]
fn test_guarded_loop_counter_is_safe() {
    let mut proc = Procedure::new("counted_loop");
    let bb0 = proc.add_block();
    let header = proc.add_block();
    let body = proc.add_block();
    let exit = proc.add_block();

    let islot = proc.alloc_scalar(bb0, "i");
    let arr = proc.alloc_array(bb0, 10, "a");
    proc.store(bb0, Operand::Const(0), islot);
    proc.set_terminator(bb0, Terminator::Br { target: header });

    let li = proc.load(header, islot);
    let cond = proc.cmp(header, CmpPred::Slt, Operand::Value(li), Operand::Const(10));
    proc.set_terminator(
        header,
        Terminator::CondBr {
            cond: Operand::Value(cond),
            then_dest: body,
            else_dest: exit,
        },
    );

    let li2 = proc.load(body, islot);
    let access = proc.elem_ptr(body, arr, Operand::Value(li2));
    proc.store(body, Operand::Const(1), access);
    let inc = proc.binary(body, BinOp::Add, Operand::Value(li2), Operand::Const(1));
    proc.store(body, Operand::Value(inc), islot);
    proc.set_terminator(body, Terminator::Br { target: header });

    let decisions = analyze_procedure(&proc).expect("analysis");
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].verdict, Verdict::Safe);
    assert_eq!(decisions[0].index_range, Interval::new(0, 9));

    let before = proc.block_count();
    assert!(!instrument_procedure(&mut proc).expect("instrumentation"));
    assert_eq!(proc.block_count(), before);
}

/// The `x == 5` arm can never run when x is pinned to 3; its access is
/// skipped without a guard.
#[test]
fn test_unreachable_access_is_omitted() {
    let mut proc = Procedure::new("dead_branch");
    let bb0 = proc.add_block();
    let dead = proc.add_block();
    let live = proc.add_block();

    let slot = proc.alloc_scalar(bb0, "x");
    let arr = proc.alloc_array(bb0, 10, "a");
    proc.store(bb0, Operand::Const(3), slot);
    let loaded = proc.load(bb0, slot);
    let cond = proc.cmp(bb0, CmpPred::Eq, Operand::Value(loaded), Operand::Const(5));
    proc.set_terminator(
        bb0,
        Terminator::CondBr {
            cond: Operand::Value(cond),
            then_dest: dead,
            else_dest: live,
        },
    );

    // Out of bounds, but on the infeasible arm.
    let access = proc.elem_ptr(dead, arr, Operand::Const(99));
    proc.store(dead, Operand::Const(1), access);

    let decisions = analyze_procedure(&proc).expect("analysis");
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].verdict, Verdict::Unreachable);

    let before = proc.block_count();
    assert!(!instrument_procedure(&mut proc).expect("instrumentation"));
    assert_eq!(proc.block_count(), before);
}

#[test]
fn test_zero_length_array_always_needs_guard() {
    let mut proc = Procedure::new("empty_array");
    let bb0 = proc.add_block();
    let arr = proc.alloc_array(bb0, 0, "a");
    let access = proc.elem_ptr(bb0, arr, Operand::Const(0));
    proc.store(bb0, Operand::Const(1), access);

    let decisions = analyze_procedure(&proc).expect("analysis");
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].verdict, Verdict::NeedsGuard);
}

#[test]
fn test_malformed_address_shape_is_ignored() {
    let mut proc = Procedure::new("malformed");
    let bb0 = proc.add_block();
    let arr = proc.alloc_array(bb0, 10, "a");
    let access = proc.elem_ptr_raw(bb0, arr, vec![Operand::Const(0)]);
    proc.store(bb0, Operand::Const(1), access);

    let decisions = analyze_procedure(&proc).expect("analysis");
    assert!(decisions.is_empty());
    assert!(!instrument_procedure(&mut proc).expect("instrumentation"));
}

/// Two nested comparisons establish 0 <= i < 10, which proves the access
/// safe without any guard.
#[test]
fn test_nested_branches_prove_safety() {
    let mut proc = Procedure::new("nested");
    let bb0 = proc.add_block();
    let upper_ok = proc.add_block();
    let both_ok = proc.add_block();
    let exit = proc.add_block();

    let n = proc.add_param("n", Ty::Int);
    let slot = proc.alloc_scalar(bb0, "i");
    let arr = proc.alloc_array(bb0, 10, "a");
    proc.store(bb0, Operand::Value(n), slot);
    let l0 = proc.load(bb0, slot);
    let below = proc.cmp(bb0, CmpPred::Slt, Operand::Value(l0), Operand::Const(10));
    proc.set_terminator(
        bb0,
        Terminator::CondBr {
            cond: Operand::Value(below),
            then_dest: upper_ok,
            else_dest: exit,
        },
    );

    let l1 = proc.load(upper_ok, slot);
    let above = proc.cmp(upper_ok, CmpPred::Sge, Operand::Value(l1), Operand::Const(0));
    proc.set_terminator(
        upper_ok,
        Terminator::CondBr {
            cond: Operand::Value(above),
            then_dest: both_ok,
            else_dest: exit,
        },
    );

    let l2 = proc.load(both_ok, slot);
    let access = proc.elem_ptr(both_ok, arr, Operand::Value(l2));
    proc.store(both_ok, Operand::Const(1), access);
    proc.set_terminator(both_ok, Terminator::Br { target: exit });

    let decisions = analyze_procedure(&proc).expect("analysis");
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].verdict, Verdict::Safe);
    assert_eq!(decisions[0].index_range, Interval::new(0, 9));
    assert!(!instrument_procedure(&mut proc).expect("instrumentation"));
}
