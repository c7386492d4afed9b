/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Human-readable summary of the analysis: the range every debug-named
//! variable holds when the procedure returns. Diagnostic only; nothing
//! downstream depends on it.

use log::debug;

use crate::datatype::AbstractDomain;
use crate::datatype::Interval;
use crate::fixpoint_iter::default_iteration_limit;
use crate::fixpoint_iter::WorklistFixpointIterator;
use crate::graph;
use crate::instrument::PassError;
use crate::ir::Procedure;
use crate::transfer::ProcedureState;
use crate::transfer::RangeTransformer;

/// The final range of every debug-named value: the join of the exit
/// states of all blocks without successors. A value the final state does
/// not constrain (or constrains to BOTTOM) reports as TOP. Each entry is
/// also traced through the `log` facade.
pub fn final_variable_ranges(proc: &Procedure) -> Result<Vec<(String, Interval)>, PassError> {
    let transformer = RangeTransformer::new(proc);
    let init = transformer.entry_state();
    let back_edges = graph::back_edges(proc);
    let mut fixpoint =
        WorklistFixpointIterator::new(proc, transformer, back_edges, default_iteration_limit(proc));
    fixpoint.run(init)?;

    let mut final_state = ProcedureState::bottom();
    for block in proc.block_ids() {
        if proc.successor_blocks(block).is_empty() {
            final_state.join_with(fixpoint.get_exit_state_at(block));
        }
    }

    let mut ranges = Vec::new();
    for value in proc.value_ids() {
        let Some(name) = proc.value_name(value) else {
            continue;
        };
        let range = match final_state.scalar(&value) {
            Some(range) if !range.is_bottom() => range,
            _ => Interval::top(),
        };
        debug!("{}: {} : {}", proc.name(), name, range);
        ranges.push((name.to_owned(), range));
    }
    Ok(ranges)
}
