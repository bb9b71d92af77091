// id.rs — Dense integer identifiers for circuit entities
//
// Kernels, registers and latches are numbered densely from zero in
// construction order. Dense ids let the liveness engine index scratch state
// by position and represent kernel sets as bitsets.

use std::fmt;

use serde::Serialize;

/// Identifier of a kernel (graph node). Index into `Circuit::kernels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct KernelId(pub u32);

/// Identifier of a virtual register. Index into `Circuit::registers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegisterId(pub u32);

/// Identifier of a latch created by one allocation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LatchId(pub u32);

/// Identifier of a compiled circuit, used to label fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct CircuitId(pub u32);

impl KernelId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl RegisterId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl LatchId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for LatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Allocator for latch ids. Produces monotonically increasing ids so that
/// latch numbering follows creation order and is deterministic.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_latch: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_latch(&mut self) -> LatchId {
        let id = LatchId(self.next_latch);
        self.next_latch += 1;
        id
    }

    /// Number of latch ids handed out so far.
    pub fn latch_count(&self) -> usize {
        self.next_latch as usize
    }
}
