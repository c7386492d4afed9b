/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use im::OrdMap;

use crate::datatype::AbstractDomain;
use crate::datatype::Interval;

/*
 * Abstract contents of one fixed-size array allocation: a `default` interval
 * covering every index not individually tracked, plus a map from exact
 * integer indices to their interval. The map is only ever written through a
 * strong update (the index is pinned to a single value); anything less
 * precise folds into `default` and drops the per-index entries. As a
 * consequence the map never holds BOTTOM and never holds an index that was
 * resolved only to a non-singleton range.
 */
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ArrayDomain {
    default: Interval,
    elements: OrdMap<i64, Interval>,
}

impl ArrayDomain {
    /// Abstraction of a freshly allocated array: every element `[0,0]`.
    pub fn new() -> Self {
        Self {
            default: Interval::new(0, 0),
            elements: OrdMap::new(),
        }
    }

    pub fn default_range(&self) -> Interval {
        self.default
    }

    /// Range of the element at `index`.
    pub fn at(&self, index: i64) -> Interval {
        self.elements.get(&index).copied().unwrap_or(self.default)
    }

    /// Range read through an access whose index resolved to `index`
    /// (`None` when the index could not be pinned to a single value).
    pub fn load(&self, index: Option<i64>) -> Interval {
        match index {
            Some(i) => self.at(i),
            None => self.default,
        }
    }

    /// Write `value` through an access whose index resolved to `index`.
    /// A pinned index is a strong update; anything else joins into
    /// `default` and invalidates the per-index entries.
    pub fn store(&mut self, index: Option<i64>, value: Interval) {
        if value.is_bottom() {
            return;
        }
        match index {
            Some(i) => {
                self.elements.insert(i, value);
            }
            None => {
                self.default.join_with(value);
                self.elements = OrdMap::new();
            }
        }
    }

    /// Forget everything: the referenced memory may have been rewritten
    /// arbitrarily (escaped through a call, or widened at a loop head).
    pub fn invalidate(&mut self) {
        self.default = Interval::top();
        self.elements = OrdMap::new();
    }

    pub fn join(&self, other: &Self) -> Self {
        let mut elements = OrdMap::new();
        for (i, r) in self.elements.iter() {
            elements.insert(*i, r.join(other.at(*i)));
        }
        for (i, r) in other.elements.iter() {
            if !self.elements.contains_key(i) {
                elements.insert(*i, self.default.join(*r));
            }
        }
        Self {
            default: self.default.join(other.default),
            elements,
        }
    }

    /// Pointwise intersection; `None` when any element (or the default)
    /// becomes infeasible.
    pub fn meet(&self, other: &Self) -> Option<Self> {
        let default = self.default.meet(other.default);
        if default.is_bottom() {
            return None;
        }
        let mut elements = OrdMap::new();
        for i in self.elements.keys().chain(other.elements.keys()) {
            let met = self.at(*i).meet(other.at(*i));
            if met.is_bottom() {
                return None;
            }
            elements.insert(*i, met);
        }
        Some(Self { default, elements })
    }

    pub fn leq(&self, other: &Self) -> bool {
        if !self.default.leq(&other.default) {
            return false;
        }
        self.elements
            .keys()
            .chain(other.elements.keys())
            .all(|i| self.at(*i).leq(&other.at(*i)))
    }
}

impl Default for ArrayDomain {
    fn default() -> Self {
        Self::new()
    }
}
