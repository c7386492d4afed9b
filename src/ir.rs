/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A compact procedure representation for the analysis to run against:
//! blocks and instructions live in flat arenas addressed by `Copy` ids,
//! control flow is derived from block terminators, and every instruction
//! result is a first-class value with a type and an optional debug name.
//! The mutation primitives at the bottom are what the instrumenter uses to
//! splice bounds checks into the graph.

use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use crate::graph::Graph;
use crate::graph::DEFAULT_GRAPH_SUCCS_NUM;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ValueId(u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockId(u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InstId(u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Ty {
    Int,
    Ptr,
    Bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operand {
    Const(i64),
    Value(ValueId),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(c) => write!(f, "{}", c),
            Operand::Value(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpPred {
    /// The predicate with its operands exchanged: `a < b` iff `b > a`.
    pub fn swapped(self) -> Self {
        match self {
            CmpPred::Eq => CmpPred::Eq,
            CmpPred::Ne => CmpPred::Ne,
            CmpPred::Slt => CmpPred::Sgt,
            CmpPred::Sle => CmpPred::Sge,
            CmpPred::Sgt => CmpPred::Slt,
            CmpPred::Sge => CmpPred::Sle,
        }
    }

    /// The logical negation: `!(a < b)` iff `a >= b`.
    pub fn inverted(self) -> Self {
        match self {
            CmpPred::Eq => CmpPred::Ne,
            CmpPred::Ne => CmpPred::Eq,
            CmpPred::Slt => CmpPred::Sge,
            CmpPred::Sle => CmpPred::Sgt,
            CmpPred::Sgt => CmpPred::Sle,
            CmpPred::Sge => CmpPred::Slt,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocKind {
    Scalar,
    Array { len: u64 },
}

#[derive(Clone, PartialEq, Debug)]
pub enum InstKind {
    Alloc(AllocKind),
    Load {
        ptr: ValueId,
    },
    Store {
        value: Operand,
        ptr: ValueId,
    },
    /// Element address computation. A well-formed fixed-size array access
    /// carries a leading zero index followed by the element index; other
    /// shapes are treated as opaque by the analysis.
    ElemPtr {
        base: ValueId,
        indices: Vec<Operand>,
    },
    Binary {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    Cmp {
        pred: CmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    /// One incoming operand per predecessor edge.
    Phi {
        incoming: Vec<(BlockId, Operand)>,
    },
    Select {
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    Call {
        callee: String,
        args: Vec<Operand>,
    },
    /// Type-preserving conversion; the operand's value set is unchanged.
    Cast {
        value: Operand,
    },
}

#[derive(Clone, PartialEq, Debug)]
pub struct Inst {
    pub kind: InstKind,
    pub result: Option<ValueId>,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Terminator {
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Operand,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    Switch {
        value: Operand,
        default: BlockId,
        cases: Vec<(i64, BlockId)>,
    },
    Ret {
        value: Option<Operand>,
    },
}

#[derive(Clone, Debug)]
enum ValueDef {
    Param,
    Inst(InstId),
}

#[derive(Clone, Debug)]
struct ValueInfo {
    ty: Ty,
    name: Option<String>,
    def: ValueDef,
}

#[derive(Clone, Debug)]
struct BlockData {
    insts: Vec<InstId>,
    terminator: Terminator,
}

#[derive(Debug, Error)]
pub enum IrError {
    #[error("block {0} does not exist")]
    UnknownBlock(BlockId),
    #[error("split point {at} is out of bounds for {block}")]
    SplitOutOfRange { block: BlockId, at: usize },
    #[error("value {0} is not defined by an instruction in the body")]
    NotAnInstruction(ValueId),
}

/// A single procedure: parameters, a value table, and flat block and
/// instruction arenas. The first block added is the entry block.
#[derive(Clone, Debug)]
pub struct Procedure {
    name: String,
    params: Vec<ValueId>,
    values: Vec<ValueInfo>,
    insts: Vec<Inst>,
    blocks: Vec<BlockData>,
}

impl Procedure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            values: Vec::new(),
            insts: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_param(&mut self, name: &str, ty: Ty) -> ValueId {
        let v = self.new_value(ty, ValueDef::Param);
        self.values[v.0 as usize].name = Some(name.to_owned());
        self.params.push(v);
        v
    }

    pub fn params(&self) -> &[ValueId] {
        &self.params
    }

    pub fn is_param(&self, value: ValueId) -> bool {
        matches!(self.values[value.0 as usize].def, ValueDef::Param)
    }

    /// Create an empty block ending in `ret void`. The first block created
    /// becomes the procedure's entry.
    pub fn add_block(&mut self) -> BlockId {
        let b = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            insts: Vec::new(),
            terminator: Terminator::Ret { value: None },
        });
        b
    }

    fn new_value(&mut self, ty: Ty, def: ValueDef) -> ValueId {
        let v = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo {
            ty,
            name: None,
            def,
        });
        v
    }

    fn append_value(&mut self, block: BlockId, kind: InstKind, ty: Ty) -> ValueId {
        let inst_id = InstId(self.insts.len() as u32);
        let result = self.new_value(ty, ValueDef::Inst(inst_id));
        self.insts.push(Inst {
            kind,
            result: Some(result),
        });
        self.blocks[block.0 as usize].insts.push(inst_id);
        result
    }

    fn append_void(&mut self, block: BlockId, kind: InstKind) {
        let inst_id = InstId(self.insts.len() as u32);
        self.insts.push(Inst { kind, result: None });
        self.blocks[block.0 as usize].insts.push(inst_id);
    }

    pub fn alloc_scalar(&mut self, block: BlockId, name: &str) -> ValueId {
        let v = self.append_value(block, InstKind::Alloc(AllocKind::Scalar), Ty::Ptr);
        self.set_name(v, name);
        v
    }

    pub fn alloc_array(&mut self, block: BlockId, len: u64, name: &str) -> ValueId {
        let v = self.append_value(block, InstKind::Alloc(AllocKind::Array { len }), Ty::Ptr);
        self.set_name(v, name);
        v
    }

    pub fn load(&mut self, block: BlockId, ptr: ValueId) -> ValueId {
        self.append_value(block, InstKind::Load { ptr }, Ty::Int)
    }

    pub fn store(&mut self, block: BlockId, value: Operand, ptr: ValueId) {
        self.append_void(block, InstKind::Store { value, ptr });
    }

    /// Address of `base[index]` in the canonical two-index shape.
    pub fn elem_ptr(&mut self, block: BlockId, base: ValueId, index: Operand) -> ValueId {
        self.elem_ptr_raw(block, base, vec![Operand::Const(0), index])
    }

    /// Address computation with an arbitrary index list; shapes other than
    /// the canonical one are opaque to the analysis.
    pub fn elem_ptr_raw(
        &mut self,
        block: BlockId,
        base: ValueId,
        indices: Vec<Operand>,
    ) -> ValueId {
        self.append_value(block, InstKind::ElemPtr { base, indices }, Ty::Ptr)
    }

    pub fn binary(&mut self, block: BlockId, op: BinOp, lhs: Operand, rhs: Operand) -> ValueId {
        self.append_value(block, InstKind::Binary { op, lhs, rhs }, Ty::Int)
    }

    pub fn cmp(&mut self, block: BlockId, pred: CmpPred, lhs: Operand, rhs: Operand) -> ValueId {
        self.append_value(block, InstKind::Cmp { pred, lhs, rhs }, Ty::Bool)
    }

    pub fn phi(&mut self, block: BlockId, incoming: Vec<(BlockId, Operand)>) -> ValueId {
        self.append_value(block, InstKind::Phi { incoming }, Ty::Int)
    }

    pub fn select(
        &mut self,
        block: BlockId,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    ) -> ValueId {
        self.append_value(
            block,
            InstKind::Select {
                cond,
                on_true,
                on_false,
            },
            Ty::Int,
        )
    }

    pub fn call(&mut self, block: BlockId, callee: &str, args: Vec<Operand>, ret: Ty) -> ValueId {
        self.append_value(
            block,
            InstKind::Call {
                callee: callee.to_owned(),
                args,
            },
            ret,
        )
    }

    pub fn cast(&mut self, block: BlockId, value: Operand) -> ValueId {
        self.append_value(block, InstKind::Cast { value }, Ty::Int)
    }

    pub fn set_name(&mut self, value: ValueId, name: &str) {
        self.values[value.0 as usize].name = Some(name.to_owned());
    }

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) {
        self.blocks[block.0 as usize].terminator = terminator;
    }

    pub fn ty(&self, value: ValueId) -> Ty {
        self.values[value.0 as usize].ty
    }

    /// Debug name, if the host recorded one. Reporting only; the analysis
    /// never depends on names.
    pub fn value_name(&self, value: ValueId) -> Option<&str> {
        self.values[value.0 as usize].name.as_deref()
    }

    pub fn display_name(&self, value: ValueId) -> String {
        match self.value_name(value) {
            Some(name) => name.to_owned(),
            None => value.to_string(),
        }
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.0 as usize]
    }

    /// The instruction defining `value`, or `None` for parameters.
    pub fn def_inst(&self, value: ValueId) -> Option<&Inst> {
        match self.values[value.0 as usize].def {
            ValueDef::Param => None,
            ValueDef::Inst(id) => Some(self.inst(id)),
        }
    }

    pub fn def_kind(&self, value: ValueId) -> Option<&InstKind> {
        self.def_inst(value).map(|inst| &inst.kind)
    }

    pub fn alloc_kind(&self, value: ValueId) -> Option<AllocKind> {
        match self.def_kind(value) {
            Some(InstKind::Alloc(kind)) => Some(*kind),
            _ => None,
        }
    }

    /// Peel an element address back to the allocation it indexes into;
    /// any other value is its own base.
    pub fn base_of(&self, ptr: ValueId) -> ValueId {
        match self.def_kind(ptr) {
            Some(InstKind::ElemPtr { base, .. }) => *base,
            _ => ptr,
        }
    }

    /// The element index of an address computation in the canonical
    /// two-index shape; `None` for anything else.
    pub fn element_index_of(&self, ptr: ValueId) -> Option<Operand> {
        match self.def_kind(ptr) {
            Some(InstKind::ElemPtr { indices, .. }) if indices.len() >= 2 => {
                indices.get(1).copied()
            }
            _ => None,
        }
    }

    pub fn value_ids(&self) -> impl Iterator<Item = ValueId> {
        (0..self.values.len() as u32).map(ValueId)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn insts_of(&self, block: BlockId) -> &[InstId] {
        &self.blocks[block.0 as usize].insts
    }

    pub fn terminator(&self, block: BlockId) -> &Terminator {
        &self.blocks[block.0 as usize].terminator
    }

    pub fn successor_blocks(&self, block: BlockId) -> SmallVec<[BlockId; DEFAULT_GRAPH_SUCCS_NUM]> {
        match &self.blocks[block.0 as usize].terminator {
            Terminator::Br { target } => SmallVec::from_slice(&[*target]),
            Terminator::CondBr {
                then_dest,
                else_dest,
                ..
            } => SmallVec::from_slice(&[*then_dest, *else_dest]),
            Terminator::Switch { default, cases, .. } => {
                let mut succs = SmallVec::new();
                succs.push(*default);
                for (_, target) in cases {
                    succs.push(*target);
                }
                succs
            }
            Terminator::Ret { .. } => SmallVec::new(),
        }
    }

    /// Locate the instruction defining `value` by block and position.
    /// Stable against earlier splits: the instruction is found wherever it
    /// currently lives.
    pub fn position_of(&self, value: ValueId) -> Option<(BlockId, usize)> {
        let id = match self.values[value.0 as usize].def {
            ValueDef::Inst(id) => id,
            ValueDef::Param => return None,
        };
        for block in self.block_ids() {
            if let Some(at) = self.insts_of(block).iter().position(|&i| i == id) {
                return Some((block, at));
            }
        }
        None
    }

    /// Split `block` at instruction boundary `at`: instructions from `at`
    /// onward and the terminator move to a fresh block, `block` falls
    /// through to it, and phi nodes in the moved terminator's successors
    /// are re-pointed at the new block.
    pub fn split_block(&mut self, block: BlockId, at: usize) -> Result<BlockId, IrError> {
        let data = self
            .blocks
            .get_mut(block.0 as usize)
            .ok_or(IrError::UnknownBlock(block))?;
        if at > data.insts.len() {
            return Err(IrError::SplitOutOfRange { block, at });
        }
        let moved = data.insts.split_off(at);
        let cont = self.add_block();
        let terminator = std::mem::replace(
            &mut self.blocks[block.0 as usize].terminator,
            Terminator::Br { target: cont },
        );
        self.blocks[cont.0 as usize].insts = moved;
        self.blocks[cont.0 as usize].terminator = terminator;

        let successors = self.successor_blocks(cont);
        for succ in successors {
            for inst_id in self.blocks[succ.0 as usize].insts.clone() {
                if let InstKind::Phi { incoming } = &mut self.insts[inst_id.0 as usize].kind {
                    for (pred, _) in incoming.iter_mut() {
                        if *pred == block {
                            *pred = cont;
                        }
                    }
                }
            }
        }
        Ok(cont)
    }
}

impl Graph for Procedure {
    type NodeId = BlockId;
    type EdgeId = (BlockId, BlockId);

    fn entry(&self) -> BlockId {
        BlockId(0)
    }

    fn nodes(&self) -> Vec<BlockId> {
        self.block_ids().collect()
    }

    fn predecessors(&self, n: BlockId) -> SmallVec<[(BlockId, BlockId); DEFAULT_GRAPH_SUCCS_NUM]> {
        let mut preds = SmallVec::new();
        for b in self.block_ids() {
            for succ in self.successor_blocks(b) {
                if succ == n {
                    preds.push((b, n));
                }
            }
        }
        preds
    }

    fn successors(&self, n: BlockId) -> SmallVec<[(BlockId, BlockId); DEFAULT_GRAPH_SUCCS_NUM]> {
        self.successor_blocks(n)
            .into_iter()
            .map(|succ| (n, succ))
            .collect()
    }

    fn source(&self, e: (BlockId, BlockId)) -> BlockId {
        e.0
    }

    fn target(&self, e: (BlockId, BlockId)) -> BlockId {
        e.1
    }

    fn size(&self) -> usize {
        self.blocks.len()
    }
}
