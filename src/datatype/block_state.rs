/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use im::OrdMap;

use crate::datatype::AbstractDomain;
use crate::datatype::ArrayDomain;
use crate::datatype::Interval;

/*
 * The abstract state recorded at a block boundary: a map from value
 * identities to intervals (scalars and pointer-sized slots alike), a map
 * from allocation identities to the abstract contents of that array, and a
 * reachability flag. An unreachable state carries empty maps and is the
 * unit of the merge; it doubles as the bottom of the lattice. The top is a
 * reachable state with empty maps, since a location without an explicit
 * binding answers TOP when queried.
 *
 * Bindings are inserted as-is: an explicit TOP binding is meaningful, as
 * path refinement only narrows locations that are tracked.
 */
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlockState<V: Clone + Ord> {
    reachable: bool,
    scalars: OrdMap<V, Interval>,
    arrays: OrdMap<V, ArrayDomain>,
}

impl<V: Clone + Ord> BlockState<V> {
    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    /// Collapse to the unreachable state, dropping every binding.
    pub fn set_unreachable(&mut self) {
        *self = Self::bottom();
    }

    pub fn scalar(&self, value: &V) -> Option<Interval> {
        self.scalars.get(value).copied()
    }

    pub fn scalar_or_top(&self, value: &V) -> Interval {
        self.scalar(value).unwrap_or_else(Interval::top)
    }

    pub fn set_scalar(&mut self, value: V, range: Interval) {
        self.scalars.insert(value, range);
    }

    pub fn array(&self, alloc: &V) -> Option<&ArrayDomain> {
        self.arrays.get(alloc)
    }

    pub fn array_mut(&mut self, alloc: &V) -> Option<&mut ArrayDomain> {
        self.arrays.get_mut(alloc)
    }

    pub fn set_array(&mut self, alloc: V, contents: ArrayDomain) {
        self.arrays.insert(alloc, contents);
    }
}

impl<V: Clone + Ord> AbstractDomain for BlockState<V> {
    fn bottom() -> Self {
        Self {
            reachable: false,
            scalars: OrdMap::new(),
            arrays: OrdMap::new(),
        }
    }

    fn top() -> Self {
        Self {
            reachable: true,
            scalars: OrdMap::new(),
            arrays: OrdMap::new(),
        }
    }

    fn is_bottom(&self) -> bool {
        !self.reachable
    }

    fn is_top(&self) -> bool {
        self.reachable && self.scalars.is_empty() && self.arrays.is_empty()
    }

    fn leq(&self, rhs: &Self) -> bool {
        if !self.reachable {
            return true;
        }
        if !rhs.reachable {
            return false;
        }
        // Keys only grow across iterations, so a binding missing on the
        // right can cover nothing but BOTTOM on the left.
        for (v, r) in self.scalars.iter() {
            let covered = match rhs.scalars.get(v) {
                Some(other) => r.leq(other),
                None => r.is_bottom(),
            };
            if !covered {
                return false;
            }
        }
        for (v, arr) in self.arrays.iter() {
            match rhs.arrays.get(v) {
                Some(other) => {
                    if !arr.leq(other) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    /// Merge `rhs` into `self`: union of keys, join on common keys, BOTTOM
    /// bindings of `rhs` skipped. An unreachable operand is absorbed; an
    /// unreachable `self` adopts `rhs` wholesale.
    fn join_with(&mut self, rhs: Self) {
        if !rhs.reachable {
            return;
        }
        if !self.reachable {
            *self = rhs;
            return;
        }
        for (v, r) in rhs.scalars {
            if r.is_bottom() {
                continue;
            }
            let joined = match self.scalars.get(&v) {
                Some(cur) => cur.join(r),
                None => r,
            };
            self.scalars.insert(v, joined);
        }
        for (v, arr) in rhs.arrays {
            let joined = match self.arrays.get(&v) {
                Some(cur) => cur.join(&arr),
                None => arr,
            };
            self.arrays.insert(v, joined);
        }
    }

    fn meet_with(&mut self, rhs: Self) {
        if !self.reachable {
            return;
        }
        if !rhs.reachable {
            self.set_unreachable();
            return;
        }
        for (v, r) in rhs.scalars {
            let met = match self.scalars.get(&v) {
                Some(cur) => cur.meet(r),
                None => r,
            };
            if met.is_bottom() {
                self.set_unreachable();
                return;
            }
            self.scalars.insert(v, met);
        }
        for (v, arr) in rhs.arrays {
            match self.arrays.get(&v) {
                Some(cur) => match cur.meet(&arr) {
                    Some(met) => {
                        self.arrays.insert(v, met);
                    }
                    None => {
                        self.set_unreachable();
                        return;
                    }
                },
                None => {
                    self.arrays.insert(v, arr);
                }
            }
        }
    }

    /// `self` is the entry state recorded for the widening point, `rhs` the
    /// refined back-edge contribution; `self` becomes the extrapolated
    /// contribution. Scalars snap the escaping bound to MIN/MAX
    /// independently per bound; an array that changed at all degrades
    /// wholesale to `default = TOP`.
    fn widen_with(&mut self, rhs: Self) {
        if !rhs.reachable || !self.reachable {
            *self = rhs;
            return;
        }
        let recorded = std::mem::replace(self, rhs);
        let scalar_keys: Vec<V> = self.scalars.keys().cloned().collect();
        for v in scalar_keys {
            if let Some(old) = recorded.scalars.get(&v) {
                if let Some(r) = self.scalars.get_mut(&v) {
                    if !old.is_bottom() && old != r {
                        let mut widened = *old;
                        widened.widen_with(*r);
                        *r = widened;
                    }
                }
            }
        }
        let array_keys: Vec<V> = self.arrays.keys().cloned().collect();
        for v in array_keys {
            if let Some(old) = recorded.arrays.get(&v) {
                if let Some(arr) = self.arrays.get_mut(&v) {
                    if old != arr {
                        arr.invalidate();
                    }
                }
            }
        }
    }
}
