/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

/// A bounded lattice with the operations the worklist iterator needs.
///
/// `widen_with` has asymmetric roles: `self` is the state recorded at the
/// previous iteration and `rhs` is the incoming candidate; afterwards `self`
/// holds the extrapolated candidate. Any bound of the candidate that escaped
/// the recorded state must be forced to a lattice-finite value, so that the
/// iteration sequence cannot grow forever.
pub trait AbstractDomain: Clone + Eq {
    fn bottom() -> Self;
    fn top() -> Self;
    fn is_bottom(&self) -> bool;
    fn is_top(&self) -> bool;
    fn leq(&self, rhs: &Self) -> bool;

    fn join(mut self, rhs: Self) -> Self {
        self.join_with(rhs);
        self
    }

    fn meet(mut self, rhs: Self) -> Self {
        self.meet_with(rhs);
        self
    }

    fn widen(mut self, rhs: Self) -> Self {
        self.widen_with(rhs);
        self
    }

    fn join_with(&mut self, rhs: Self);
    fn meet_with(&mut self, rhs: Self);
    fn widen_with(&mut self, rhs: Self);
}
