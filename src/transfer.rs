/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The abstract semantics of one instruction: a closed match over the
//! opcode enumeration, updating the block state in place. Kinds without an
//! arm are deliberately left unbound; queries on unbound values answer
//! TOP, which keeps the analysis fail-open.

use std::collections::HashMap;

use crate::datatype::AbstractDomain;
use crate::datatype::ArrayDomain;
use crate::datatype::BlockState;
use crate::datatype::Interval;
use crate::fixpoint_iter::FixpointIteratorTransformer;
use crate::ir::AllocKind;
use crate::ir::BinOp;
use crate::ir::BlockId;
use crate::ir::Inst;
use crate::ir::InstKind;
use crate::ir::Operand;
use crate::ir::Procedure;
use crate::ir::Ty;
use crate::ir::ValueId;
use crate::refine;

/// Abstract state instantiated over the procedure's value identities.
pub type ProcedureState = BlockState<ValueId>;

pub struct RangeTransformer<'p> {
    proc: &'p Procedure,
}

impl<'p> RangeTransformer<'p> {
    pub fn new(proc: &'p Procedure) -> Self {
        Self { proc }
    }

    /// The state the entry block seeds from: reachable, every parameter
    /// explicitly TOP (explicit so that branch refinement can narrow it).
    pub fn entry_state(&self) -> ProcedureState {
        let mut state = ProcedureState::top();
        for &param in self.proc.params() {
            state.set_scalar(param, Interval::top());
        }
        state
    }

    /// Range of `operand` in `state`. Constants are exact; tracked values
    /// answer their binding; untracked values resolve through their
    /// defining instruction (binary operators recurse over operands, loads
    /// go through the array contents or the slot's scalar binding);
    /// everything else is TOP. An unreachable state resolves everything to
    /// BOTTOM.
    pub fn eval_operand(&self, operand: &Operand, state: &ProcedureState) -> Interval {
        if !state.is_reachable() {
            return Interval::bottom();
        }
        match operand {
            Operand::Const(c) => Interval::singleton(*c),
            Operand::Value(v) => self.eval_value(*v, state),
        }
    }

    fn eval_value(&self, value: ValueId, state: &ProcedureState) -> Interval {
        if let Some(range) = state.scalar(&value) {
            return range;
        }
        match self.proc.def_kind(value) {
            Some(InstKind::Binary { op, lhs, rhs }) => {
                let r1 = self.eval_operand(lhs, state);
                let r2 = self.eval_operand(rhs, state);
                binary_range(*op, r1, r2)
            }
            Some(InstKind::Load { ptr }) => self.eval_load(*ptr, state),
            _ => Interval::top(),
        }
    }

    fn eval_load(&self, ptr: ValueId, state: &ProcedureState) -> Interval {
        let base = self.proc.base_of(ptr);
        if base != ptr {
            if let Some(contents) = state.array(&base) {
                return match self.proc.element_index_of(ptr) {
                    Some(index) => contents.load(self.resolve_index(&index, state)),
                    // Unexpected address shape: opaque.
                    None => Interval::top(),
                };
            }
        }
        state.scalar_or_top(&base)
    }

    /// The exact element index an access resolves to: a literal constant,
    /// or an operand whose range pins down to a singleton.
    fn resolve_index(&self, index: &Operand, state: &ProcedureState) -> Option<i64> {
        match index {
            Operand::Const(c) => Some(*c),
            Operand::Value(_) => self.eval_operand(index, state).as_constant(),
        }
    }

    /// Apply one instruction to `state`. `exit_states` is consulted only
    /// for operands defined across an edge (merge instructions); no other
    /// block's state is touched.
    pub fn transfer_inst(
        &self,
        block: BlockId,
        inst: &Inst,
        state: &mut ProcedureState,
        exit_states: &HashMap<BlockId, ProcedureState>,
    ) {
        match &inst.kind {
            InstKind::Phi { incoming } => {
                let Some(dest) = inst.result else { return };
                let mut merged = Interval::bottom();
                for (pred, value) in incoming {
                    let Some(pred_exit) = exit_states.get(pred) else {
                        continue;
                    };
                    if pred_exit.is_bottom() {
                        continue;
                    }
                    let refined = refine::refine_edge(self.proc, *pred, block, pred_exit.clone());
                    merged.join_with(self.eval_operand(value, &refined));
                }
                state.set_scalar(dest, merged);
            }
            InstKind::Alloc(kind) => {
                let Some(dest) = inst.result else { return };
                match kind {
                    AllocKind::Array { .. } => state.set_array(dest, ArrayDomain::new()),
                    AllocKind::Scalar => state.set_scalar(dest, Interval::top()),
                }
            }
            InstKind::Load { ptr } => {
                let Some(dest) = inst.result else { return };
                let range = self.eval_load(*ptr, state);
                state.set_scalar(dest, range);
            }
            InstKind::Store { value, ptr } => {
                let written = self.eval_operand(value, state);
                let base = self.proc.base_of(*ptr);
                if base != *ptr && state.array(&base).is_some() {
                    let resolved = match self.proc.element_index_of(*ptr) {
                        Some(index) => self.resolve_index(&index, state),
                        // Unexpected address shape: fold into the weak case.
                        None => None,
                    };
                    if let Some(contents) = state.array_mut(&base) {
                        contents.store(resolved, written);
                    }
                } else {
                    // Strong update of the slot; no intra-block aliasing is
                    // modeled.
                    state.set_scalar(base, written);
                }
            }
            InstKind::Call { args, .. } => {
                // The callee may rewrite anything reachable through a
                // pointer argument.
                for arg in args {
                    let Operand::Value(v) = arg else { continue };
                    if self.proc.ty(*v) != Ty::Ptr {
                        continue;
                    }
                    let base = self.proc.base_of(*v);
                    if let Some(contents) = state.array_mut(&base) {
                        contents.invalidate();
                    } else {
                        state.set_scalar(base, Interval::top());
                    }
                }
                if let Some(dest) = inst.result {
                    if self.proc.ty(dest) == Ty::Ptr {
                        state.set_scalar(dest, Interval::top());
                    }
                }
            }
            InstKind::Binary { op, lhs, rhs } => {
                let Some(dest) = inst.result else { return };
                let r1 = self.eval_operand(lhs, state);
                let r2 = self.eval_operand(rhs, state);
                state.set_scalar(dest, binary_range(*op, r1, r2));
            }
            InstKind::Select {
                on_true, on_false, ..
            } => {
                // No condition-based narrowing here; narrowing only
                // happens at control edges.
                let Some(dest) = inst.result else { return };
                let range = self
                    .eval_operand(on_true, state)
                    .join(self.eval_operand(on_false, state));
                state.set_scalar(dest, range);
            }
            InstKind::Cast { value } => {
                let Some(dest) = inst.result else { return };
                let range = self.eval_operand(value, state);
                state.set_scalar(dest, range);
            }
            // Address computations and comparisons carry no integer range
            // of their own; left unbound.
            InstKind::ElemPtr { .. } | InstKind::Cmp { .. } => {}
        }
    }
}

fn binary_range(op: BinOp, lhs: Interval, rhs: Interval) -> Interval {
    match op {
        BinOp::Add => lhs.add(rhs),
        BinOp::Sub => lhs.sub(rhs),
        BinOp::Mul => lhs.mul(rhs),
        // Division, remainder and bitwise combines are not modeled.
        BinOp::Div | BinOp::Rem | BinOp::And => Interval::top(),
    }
}

impl<'p> FixpointIteratorTransformer<Procedure, ProcedureState> for RangeTransformer<'p> {
    fn analyze_node(
        &self,
        n: BlockId,
        current_state: &mut ProcedureState,
        exit_states: &HashMap<BlockId, ProcedureState>,
    ) {
        if current_state.is_bottom() {
            return;
        }
        for &inst_id in self.proc.insts_of(n) {
            self.transfer_inst(n, self.proc.inst(inst_id), current_state, exit_states);
        }
    }

    fn analyze_edge(
        &self,
        e: (BlockId, BlockId),
        exit_state_at_src: &ProcedureState,
    ) -> ProcedureState {
        refine::refine_edge(self.proc, e.0, e.1, exit_state_at_src.clone())
    }
}
