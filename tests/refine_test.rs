/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use rampart::datatype::AbstractDomain;
use rampart::datatype::Interval;
use rampart::ir::BlockId;
use rampart::ir::CmpPred;
use rampart::ir::Operand;
use rampart::ir::Procedure;
use rampart::ir::Terminator;
use rampart::ir::ValueId;
use rampart::refine::refine_edge;
use rampart::transfer::ProcedureState;

/// bb0 compares a loaded slot against `constant` and branches; returns the
/// procedure, the slot, and the (entry, then, else) blocks.
fn branch_on_slot(
    pred: CmpPred,
    constant: i64,
) -> (Procedure, ValueId, BlockId, BlockId, BlockId) {
    let mut proc = Procedure::new("branch");
    let bb0 = proc.add_block();
    let then_bb = proc.add_block();
    let else_bb = proc.add_block();
    let slot = proc.alloc_scalar(bb0, "x");
    let loaded = proc.load(bb0, slot);
    let cond = proc.cmp(bb0, pred, Operand::Value(loaded), Operand::Const(constant));
    proc.set_terminator(
        bb0,
        Terminator::CondBr {
            cond: Operand::Value(cond),
            then_dest: then_bb,
            else_dest: else_bb,
        },
    );
    (proc, slot, bb0, then_bb, else_bb)
}

fn state_with(slot: ValueId, range: Interval) -> ProcedureState {
    let mut state = ProcedureState::top();
    state.set_scalar(slot, range);
    state
}

#[test]
fn test_refine_is_idempotent_per_edge() {
    let (proc, slot, bb0, then_bb, _) = branch_on_slot(CmpPred::Slt, 10);
    let state = state_with(slot, Interval::top());

    let once = refine_edge(&proc, bb0, then_bb, state);
    let twice = refine_edge(&proc, bb0, then_bb, once.clone());
    assert_eq!(once, twice);
    assert_eq!(once.scalar(&slot), Some(Interval::new(i32::MIN, 9)));
}

#[test]
fn test_both_edges_of_a_strict_compare() {
    let (proc, slot, bb0, then_bb, else_bb) = branch_on_slot(CmpPred::Sge, 3);
    let state = state_with(slot, Interval::new(0, 20));

    let taken = refine_edge(&proc, bb0, then_bb, state.clone());
    assert_eq!(taken.scalar(&slot), Some(Interval::new(3, 20)));

    let fallthrough = refine_edge(&proc, bb0, else_bb, state);
    assert_eq!(fallthrough.scalar(&slot), Some(Interval::new(0, 2)));
}

#[test]
fn test_inequality_refines_only_to_infeasibility() {
    let (proc, slot, bb0, then_bb, else_bb) = branch_on_slot(CmpPred::Ne, 5);

    // The slot is pinned to the compared constant: the `!=` edge is
    // infeasible, the `==` edge keeps the singleton.
    let pinned = state_with(slot, Interval::new(5, 5));
    let taken = refine_edge(&proc, bb0, then_bb, pinned.clone());
    assert!(taken.is_bottom());
    let fallthrough = refine_edge(&proc, bb0, else_bb, pinned);
    assert_eq!(fallthrough.scalar(&slot), Some(Interval::new(5, 5)));

    // A wider range is not narrowed by `!=`.
    let wide = state_with(slot, Interval::new(0, 9));
    let taken = refine_edge(&proc, bb0, then_bb, wide);
    assert_eq!(taken.scalar(&slot), Some(Interval::new(0, 9)));
}

#[test]
fn test_untracked_subject_passes_through() {
    let (proc, _slot, bb0, then_bb, _) = branch_on_slot(CmpPred::Slt, 10);
    let state = ProcedureState::top();
    let refined = refine_edge(&proc, bb0, then_bb, state.clone());
    assert_eq!(refined, state);
}

#[test]
fn test_equality_outside_the_domain_is_infeasible() {
    let (proc, slot, bb0, then_bb, _) = branch_on_slot(CmpPred::Eq, i64::MAX);
    let state = state_with(slot, Interval::top());
    let refined = refine_edge(&proc, bb0, then_bb, state);
    assert!(refined.is_bottom());
}

#[test]
fn test_only_the_compared_location_is_refined() {
    let (mut proc, slot, bb0, then_bb, _) = branch_on_slot(CmpPred::Slt, 10);
    let other = proc.alloc_scalar(bb0, "y");
    let mut state = state_with(slot, Interval::top());
    state.set_scalar(other, Interval::new(3, 4));

    let refined = refine_edge(&proc, bb0, then_bb, state);
    assert_eq!(refined.scalar(&slot), Some(Interval::new(i32::MIN, 9)));
    assert_eq!(refined.scalar(&other), Some(Interval::new(3, 4)));
}

#[test]
fn test_switch_case_edges() {
    let mut proc = Procedure::new("switch");
    let bb0 = proc.add_block();
    let low_bb = proc.add_block();
    let high_bb = proc.add_block();
    let default_bb = proc.add_block();
    let slot = proc.alloc_scalar(bb0, "x");
    let loaded = proc.load(bb0, slot);
    proc.set_terminator(
        bb0,
        Terminator::Switch {
            value: Operand::Value(loaded),
            default: default_bb,
            cases: vec![(1, low_bb), (2, low_bb), (7, high_bb)],
        },
    );

    let pinned = state_with(slot, Interval::new(7, 7));
    // No case constant of this edge matches a slot pinned to 7.
    let infeasible = refine_edge(&proc, bb0, low_bb, pinned.clone());
    assert!(infeasible.is_bottom());

    let feasible = refine_edge(&proc, bb0, high_bb, pinned.clone());
    assert_eq!(feasible.scalar(&slot), Some(Interval::new(7, 7)));

    let default_edge = refine_edge(&proc, bb0, default_bb, pinned.clone());
    assert_eq!(default_edge, pinned);
}
