// latch.rs — Reusable storage slots
//
// A latch is bound to a sequence of registers over one cycle, never to two
// at once. It is either open (may accept another occupant once every reader
// of the current one is known to have finished) or sealed (final). Binding
// consumes an open latch and yields the successor state, so a sealed latch
// has no way to accept an occupant.
//
// Preconditions: occupants are bound in the order the liveness engine
//                processes their producers.
// Postconditions: `peak_bytes` is the largest footprint over all occupants.
// Failure modes: none.
// Side effects: none.

use serde::Serialize;

use crate::id::{LatchId, RegisterId};
use crate::kernel_set::KernelSet;
use crate::types::FieldType;

// ── Resource class ──────────────────────────────────────────────────────────

/// Physical resource a latch is carved from. Image memory is never mixed
/// with buffer memory, and image latches hold a single exact field type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceClass {
    Buffer,
    Image { field_type: FieldType },
}

impl ResourceClass {
    pub fn for_field(ty: &FieldType) -> Self {
        if ty.image {
            ResourceClass::Image {
                field_type: ty.clone(),
            }
        } else {
            ResourceClass::Buffer
        }
    }
}

/// A proposed use of storage: the register's resource class and footprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequest {
    pub resource: ResourceClass,
    pub bytes: usize,
}

/// A register about to be bound, with the kernels that will read it.
#[derive(Debug, Clone)]
pub struct Occupant {
    pub register: RegisterId,
    pub sinks: KernelSet,
    pub bytes: usize,
}

// ── Latch states ────────────────────────────────────────────────────────────

/// A latch that may accept further occupants.
#[derive(Debug, Clone)]
pub struct OpenLatch {
    id: LatchId,
    resource: ResourceClass,
    occupants: Vec<RegisterId>,
    peak_bytes: usize,
    last_consumers: KernelSet,
}

/// A latch that accepts no further occupants.
#[derive(Debug, Clone)]
pub struct SealedLatch {
    id: LatchId,
    resource: ResourceClass,
    occupants: Vec<RegisterId>,
    peak_bytes: usize,
}

/// Either state, as stored by a catalog.
#[derive(Debug, Clone)]
pub enum Latch {
    Open(OpenLatch),
    Sealed(SealedLatch),
}

impl OpenLatch {
    /// A fresh, unoccupied latch.
    pub fn new(id: LatchId, resource: ResourceClass) -> Self {
        OpenLatch {
            id,
            resource,
            occupants: Vec::new(),
            peak_bytes: 0,
            last_consumers: KernelSet::with_capacity(0),
        }
    }

    pub fn id(&self) -> LatchId {
        self.id
    }

    pub fn resource(&self) -> &ResourceClass {
        &self.resource
    }

    pub fn occupants(&self) -> &[RegisterId] {
        &self.occupants
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    /// Readers of the current occupant.
    pub fn last_consumers(&self) -> &KernelSet {
        &self.last_consumers
    }

    /// True iff every reader of the current occupant is among `precursors`,
    /// the kernels guaranteed to have finished before the would-be writer.
    pub fn is_eligible_for(&self, precursors: &KernelSet) -> bool {
        self.last_consumers.is_subset(precursors)
    }

    /// Record `occupant` as the new tenant. With `seal_now` the latch becomes
    /// final.
    pub fn bind(mut self, occupant: Occupant, seal_now: bool) -> Latch {
        self.occupants.push(occupant.register);
        self.peak_bytes = self.peak_bytes.max(occupant.bytes);
        if seal_now {
            Latch::Sealed(SealedLatch {
                id: self.id,
                resource: self.resource,
                occupants: self.occupants,
                peak_bytes: self.peak_bytes,
            })
        } else {
            self.last_consumers = occupant.sinks;
            Latch::Open(self)
        }
    }
}

impl SealedLatch {
    pub fn id(&self) -> LatchId {
        self.id
    }

    pub fn resource(&self) -> &ResourceClass {
        &self.resource
    }

    pub fn occupants(&self) -> &[RegisterId] {
        &self.occupants
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }
}

impl Latch {
    pub fn id(&self) -> LatchId {
        match self {
            Latch::Open(l) => l.id,
            Latch::Sealed(l) => l.id,
        }
    }

    pub fn resource(&self) -> &ResourceClass {
        match self {
            Latch::Open(l) => &l.resource,
            Latch::Sealed(l) => &l.resource,
        }
    }

    pub fn occupants(&self) -> &[RegisterId] {
        match self {
            Latch::Open(l) => &l.occupants,
            Latch::Sealed(l) => &l.occupants,
        }
    }

    pub fn peak_bytes(&self) -> usize {
        match self {
            Latch::Open(l) => l.peak_bytes,
            Latch::Sealed(l) => l.peak_bytes,
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, Latch::Sealed(_))
    }

    pub fn as_open(&self) -> Option<&OpenLatch> {
        match self {
            Latch::Open(l) => Some(l),
            Latch::Sealed(_) => None,
        }
    }
}
