/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Path-sensitive narrowing: entering a successor of a conditional branch
//! or a switch tells us something about the value the terminator branched
//! on, so the predecessor's exit state can be intersected with the range
//! implied by the edge. Exactly one location is refined per edge; every
//! other binding passes through unchanged. Refinement is idempotent.

use crate::datatype::AbstractDomain;
use crate::datatype::Interval;
use crate::ir::BlockId;
use crate::ir::CmpPred;
use crate::ir::InstKind;
use crate::ir::Operand;
use crate::ir::Procedure;
use crate::ir::Terminator;
use crate::ir::ValueId;
use crate::transfer::ProcedureState;

/// Narrow `state` for entry into `dst` along the `src -> dst` edge.
pub fn refine_edge(
    proc: &Procedure,
    src: BlockId,
    dst: BlockId,
    state: ProcedureState,
) -> ProcedureState {
    if state.is_bottom() {
        return state;
    }
    match proc.terminator(src) {
        Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        } => refine_branch(proc, *cond, *then_dest, *else_dest, dst, state),
        Terminator::Switch {
            value,
            default,
            cases,
        } => refine_switch(proc, *value, *default, cases, dst, state),
        _ => state,
    }
}

/// The location a comparison or switch operand talks about: a load takes
/// the loaded slot's base, a parameter or an already-tracked value stands
/// for itself. Anything else is not refinable.
fn refinement_subject(
    proc: &Procedure,
    operand: Operand,
    state: &ProcedureState,
) -> Option<ValueId> {
    let Operand::Value(v) = operand else {
        return None;
    };
    match proc.def_kind(v) {
        Some(InstKind::Load { ptr }) => Some(proc.base_of(*ptr)),
        _ if proc.is_param(v) || state.scalar(&v).is_some() => Some(v),
        _ => None,
    }
}

fn refine_branch(
    proc: &Procedure,
    cond: Operand,
    then_dest: BlockId,
    _else_dest: BlockId,
    dst: BlockId,
    mut state: ProcedureState,
) -> ProcedureState {
    let Operand::Value(cond_value) = cond else {
        return state;
    };
    let Some(InstKind::Cmp { pred, lhs, rhs }) = proc.def_kind(cond_value) else {
        return state;
    };

    // The constant may sit on either side; swapping the predicate puts the
    // tracked location on the left.
    let (subject, constant, mut pred) = match (refinement_subject(proc, *lhs, &state), *rhs) {
        (Some(subject), Operand::Const(k)) => (subject, k, *pred),
        _ => match (refinement_subject(proc, *rhs, &state), *lhs) {
            (Some(subject), Operand::Const(k)) => (subject, k, pred.swapped()),
            _ => return state,
        },
    };
    let Some(var_range) = state.scalar(&subject) else {
        return state;
    };

    if dst != then_dest {
        pred = pred.inverted();
    }

    let filter = match pred {
        CmpPred::Sgt => Interval::at_least(constant.saturating_add(1)),
        CmpPred::Sge => Interval::at_least(constant),
        CmpPred::Slt => Interval::at_most(constant.saturating_sub(1)),
        CmpPred::Sle => Interval::at_most(constant),
        CmpPred::Eq => exact(constant),
        // An inequality only refines when it rules out the one remaining
        // value; otherwise the range is left as-is.
        CmpPred::Ne => {
            if var_range.as_constant() == Some(constant) {
                Interval::bottom()
            } else {
                Interval::top()
            }
        }
    };

    let refined = var_range.meet(filter);
    state.set_scalar(subject, refined);
    if refined.is_bottom() {
        state.set_unreachable();
    }
    state
}

fn refine_switch(
    proc: &Procedure,
    value: Operand,
    default: BlockId,
    cases: &[(i64, BlockId)],
    dst: BlockId,
    mut state: ProcedureState,
) -> ProcedureState {
    let Some(subject) = refinement_subject(proc, value, &state) else {
        return state;
    };
    let Some(var_range) = state.scalar(&subject) else {
        return state;
    };
    // The default edge carries no usable constraint.
    if dst == default {
        return state;
    }

    let mut case_range = Interval::bottom();
    for (k, target) in cases {
        if *target == dst {
            case_range.join_with(exact(*k));
        }
    }

    let refined = var_range.meet(case_range);
    state.set_scalar(subject, refined);
    if refined.is_bottom() {
        state.set_unreachable();
    }
    state
}

/// The singleton for a constant that fits the 32-bit domain; a constant
/// outside it can never be matched, so the filter is empty.
fn exact(constant: i64) -> Interval {
    if (i32::MIN as i64..=i32::MAX as i64).contains(&constant) {
        Interval::singleton(constant)
    } else {
        Interval::bottom()
    }
}
