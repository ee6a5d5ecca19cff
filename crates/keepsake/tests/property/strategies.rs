//! Proptest strategies for driving contexts with generated operations.

#![allow(dead_code)]

use proptest::prelude::*;

/// One step applied to a context under test.
#[derive(Debug, Clone)]
pub enum Op {
    /// Push the n-th pushable definition of the fixture.
    Push(usize),
    Pop,
    /// Bind a value in the top frame.
    Put(u8, i64),
    Unpush,
    Repush,
}

/// Number of definitions `Op::Push` picks from.
pub const PUSHABLE: usize = 5;

pub fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..PUSHABLE).prop_map(Op::Push),
        4 => Just(Op::Pop),
        3 => (0u8..8, any::<i64>()).prop_map(|(key, value)| Op::Put(key, value)),
        1 => Just(Op::Unpush),
        1 => Just(Op::Repush),
    ]
}

pub fn arb_ops(max: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(arb_op(), 0..max)
}

/// Push-only sequences, for building a stack before branching.
pub fn arb_pushes(max: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..PUSHABLE, 1..max)
}

pub fn key(index: u8) -> String {
    format!("k{index}")
}
