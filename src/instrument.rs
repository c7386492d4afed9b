/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The per-procedure transformation step: run the fixpoint analysis, decide
//! for every array-element access whether its index is provably in bounds,
//! and splice a runtime check in front of every access where it is not.
//! All decisions are made against the converged states before the first
//! mutation; accesses are then relocated by value identity, so earlier
//! splits cannot invalidate later ones.

use log::debug;
use log::error;
use thiserror::Error;

use crate::datatype::AbstractDomain;
use crate::datatype::Interval;
use crate::fixpoint_iter::default_iteration_limit;
use crate::fixpoint_iter::FixpointError;
use crate::fixpoint_iter::WorklistFixpointIterator;
use crate::graph;
use crate::ir::AllocKind;
use crate::ir::BinOp;
use crate::ir::CmpPred;
use crate::ir::InstKind;
use crate::ir::IrError;
use crate::ir::Operand;
use crate::ir::Procedure;
use crate::ir::Terminator;
use crate::ir::ValueId;
use crate::transfer::RangeTransformer;

#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    Fixpoint(#[from] FixpointError),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Verdict {
    /// Containment could not be proven; a runtime check is required.
    NeedsGuard,
    /// The index range provably lies within `[0, len - 1]`.
    Safe,
    /// The access sits in a block no execution reaches.
    Unreachable,
}

/// The outcome of the bounds decision for one array-element access.
#[derive(Clone, Debug)]
pub struct AccessDecision {
    /// The element-address value the decision is about.
    pub access: ValueId,
    pub base: ValueId,
    pub index: Operand,
    pub len: u64,
    pub index_range: Interval,
    pub verdict: Verdict,
}

/// Run the analysis and decide every access, without touching the graph.
/// Accesses are visited in block order, then instruction order.
pub fn analyze_procedure(proc: &Procedure) -> Result<Vec<AccessDecision>, PassError> {
    let transformer = RangeTransformer::new(proc);
    let init = transformer.entry_state();
    let back_edges = graph::back_edges(proc);
    let mut fixpoint =
        WorklistFixpointIterator::new(proc, transformer, back_edges, default_iteration_limit(proc));
    if let Err(e) = fixpoint.run(init) {
        error!("{}: {}; leaving the procedure untouched", proc.name(), e);
        return Err(e.into());
    }

    let replayer = RangeTransformer::new(proc);
    let mut decisions = Vec::new();
    for block in proc.block_ids() {
        for (at, &inst_id) in proc.insts_of(block).iter().enumerate() {
            let inst = proc.inst(inst_id);
            let InstKind::ElemPtr { base, .. } = &inst.kind else {
                continue;
            };
            let Some(access) = inst.result else { continue };
            let Some(AllocKind::Array { len }) = proc.alloc_kind(*base) else {
                continue;
            };
            let Some(index) = proc.element_index_of(access) else {
                // Not the recognized element-access shape; opaque.
                continue;
            };

            let entry = fixpoint.get_entry_state_at(block);
            if entry.is_bottom() {
                debug!(
                    "{}: access {}[{}] unreachable, guard omitted",
                    proc.name(),
                    proc.display_name(*base),
                    index,
                );
                decisions.push(AccessDecision {
                    access,
                    base: *base,
                    index,
                    len,
                    index_range: Interval::bottom(),
                    verdict: Verdict::Unreachable,
                });
                continue;
            }

            // Replay the block prefix from the recorded entry state to
            // recover the ranges holding at the access point.
            let mut state = entry;
            for &early in &proc.insts_of(block)[..at] {
                replayer.transfer_inst(block, proc.inst(early), &mut state, fixpoint.exit_states());
            }
            let index_range = replayer.eval_operand(&index, &state);

            let in_bounds = !index_range.is_bottom()
                && index_range.low() >= 0
                && (index_range.high() as u64) < len;
            let verdict = if in_bounds {
                debug!(
                    "{}: access {}[{}] range {} within size {}, guard skipped",
                    proc.name(),
                    proc.display_name(*base),
                    index,
                    index_range,
                    len,
                );
                Verdict::Safe
            } else {
                debug!(
                    "{}: access {}[{}] range {} vs size {}, guard required",
                    proc.name(),
                    proc.display_name(*base),
                    index,
                    index_range,
                    len,
                );
                Verdict::NeedsGuard
            };
            decisions.push(AccessDecision {
                access,
                base: *base,
                index,
                len,
                index_range,
                verdict,
            });
        }
    }
    Ok(decisions)
}

/// Analyze, then insert a bounds check in front of every access that needs
/// one. Returns whether the graph was modified. A failed mutation aborts
/// only that access's guard.
pub fn instrument_procedure(proc: &mut Procedure) -> Result<bool, PassError> {
    let decisions = analyze_procedure(proc)?;
    let mut modified = false;
    for decision in &decisions {
        if decision.verdict != Verdict::NeedsGuard {
            continue;
        }
        match insert_guard(proc, decision) {
            Ok(()) => modified = true,
            Err(e) => error!(
                "{}: failed to insert guard for access {}: {}",
                proc.name(),
                decision.access,
                e,
            ),
        }
    }
    Ok(modified)
}

/// Split the containing block in front of the access and branch on
/// `index >= 0 AND index < len` to the continuation, or to a fresh block
/// returning a sentinel error value.
fn insert_guard(proc: &mut Procedure, decision: &AccessDecision) -> Result<(), IrError> {
    let (block, at) = proc
        .position_of(decision.access)
        .ok_or(IrError::NotAnInstruction(decision.access))?;
    let cont = proc.split_block(block, at)?;
    let fail = proc.add_block();
    proc.set_terminator(
        fail,
        Terminator::Ret {
            value: Some(Operand::Const(-1)),
        },
    );

    let len = decision.len.min(i64::MAX as u64) as i64;
    let low = proc.cmp(block, CmpPred::Sge, decision.index, Operand::Const(0));
    let high = proc.cmp(block, CmpPred::Slt, decision.index, Operand::Const(len));
    let in_bounds = proc.binary(block, BinOp::And, Operand::Value(low), Operand::Value(high));
    proc.set_terminator(
        block,
        Terminator::CondBr {
            cond: Operand::Value(in_bounds),
            then_dest: cont,
            else_dest: fail,
        },
    );
    debug!(
        "{}: guard inserted before access {}[{}]",
        proc.name(),
        proc.display_name(decision.base),
        decision.index,
    );
    Ok(())
}
