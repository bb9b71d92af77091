// plan.rs — Register → latch sharing plan
//
// The result of one allocation pass, handed to a memory binder that reserves
// one physical buffer per latch sized to the latch's peak footprint.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::alloc::{AllocatorMode, SealReason};
use crate::catalog::CatalogPolicy;
use crate::id::{KernelId, LatchId, RegisterId};
use crate::latch::{Latch, ResourceClass};

/// One register bound to a latch, in binding order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub register: RegisterId,
    pub name: String,
    pub kernel: KernelId,
    pub latch: LatchId,
    pub bytes: usize,
    /// Why the binding sealed its latch, if it did.
    pub seal: Option<SealReason>,
}

/// Final state of one latch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatchSummary {
    pub id: LatchId,
    pub resource: ResourceClass,
    pub occupants: Vec<RegisterId>,
    pub peak_bytes: usize,
    pub sealed: bool,
}

impl LatchSummary {
    pub fn from_latch(latch: &Latch) -> Self {
        LatchSummary {
            id: latch.id(),
            resource: latch.resource().clone(),
            occupants: latch.occupants().to_vec(),
            peak_bytes: latch.peak_bytes(),
            sealed: latch.is_sealed(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatchPlan {
    pub circuit: String,
    pub mode: AllocatorMode,
    pub catalog: CatalogPolicy,
    pub bindings: Vec<Binding>,
    /// Indexed by latch id.
    pub latches: Vec<LatchSummary>,
    #[serde(skip)]
    by_register: BTreeMap<RegisterId, usize>,
}

impl LatchPlan {
    pub fn new(
        circuit: impl Into<String>,
        mode: AllocatorMode,
        catalog: CatalogPolicy,
        bindings: Vec<Binding>,
        mut latches: Vec<LatchSummary>,
    ) -> Self {
        latches.sort_by_key(|l| l.id);
        let by_register = bindings
            .iter()
            .enumerate()
            .map(|(i, b)| (b.register, i))
            .collect();
        LatchPlan {
            circuit: circuit.into(),
            mode,
            catalog,
            bindings,
            latches,
            by_register,
        }
    }

    pub fn binding(&self, register: RegisterId) -> Option<&Binding> {
        self.by_register.get(&register).map(|&i| &self.bindings[i])
    }

    pub fn latch_of(&self, register: RegisterId) -> Option<LatchId> {
        self.binding(register).map(|b| b.latch)
    }

    pub fn latch(&self, id: LatchId) -> Option<&LatchSummary> {
        self.latches.get(id.index()).filter(|l| l.id == id)
    }

    /// The total register → latch map.
    pub fn assignments(&self) -> BTreeMap<RegisterId, LatchId> {
        self.bindings.iter().map(|b| (b.register, b.latch)).collect()
    }

    /// Registers sharing `latch`, in binding order.
    pub fn occupants(&self, latch: LatchId) -> &[RegisterId] {
        self.latch(latch).map(|l| l.occupants.as_slice()).unwrap_or(&[])
    }

    pub fn latch_count(&self) -> usize {
        self.latches.len()
    }

    /// Bytes reserved by a binder honoring the plan. Saturating.
    pub fn reserved_bytes(&self) -> usize {
        self.latches
            .iter()
            .fold(0usize, |acc, l| acc.saturating_add(l.peak_bytes))
    }

    /// Bytes needed without any sharing.
    pub fn unshared_bytes(&self) -> usize {
        self.bindings
            .iter()
            .fold(0usize, |acc, b| acc.saturating_add(b.bytes))
    }
}

impl fmt::Display for LatchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "LatchPlan '{}' ({}, {}): {} registers, {} latches, {} of {} bytes",
            self.circuit,
            self.mode.name(),
            self.catalog.name(),
            self.bindings.len(),
            self.latches.len(),
            self.reserved_bytes(),
            self.unshared_bytes()
        )?;
        for latch in &self.latches {
            let resource = match &latch.resource {
                ResourceClass::Buffer => "buffer".to_string(),
                ResourceClass::Image { field_type } => field_type.to_string(),
            };
            let state = if latch.sealed { "sealed" } else { "open" };
            let names: Vec<&str> = latch
                .occupants
                .iter()
                .filter_map(|r| self.binding(*r).map(|b| b.name.as_str()))
                .collect();
            writeln!(
                f,
                "  {} {} {}B {}: {}",
                latch.id,
                resource,
                latch.peak_bytes,
                state,
                names.join(", ")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementKind, FieldType};

    fn binding(reg: u32, name: &str, latch: u32, bytes: usize) -> Binding {
        Binding {
            register: RegisterId(reg),
            name: name.to_string(),
            kernel: KernelId(reg),
            latch: LatchId(latch),
            bytes,
            seal: None,
        }
    }

    fn sample() -> LatchPlan {
        let img = FieldType::image(ElementKind::U8, &[2, 2]);
        LatchPlan::new(
            "sample",
            AllocatorMode::OutOfOrder,
            CatalogPolicy::Exact,
            vec![
                binding(0, "a", 0, 16),
                binding(1, "b", 1, 4),
                binding(2, "c", 0, 16),
            ],
            vec![
                LatchSummary {
                    id: LatchId(1),
                    resource: ResourceClass::Image { field_type: img },
                    occupants: vec![RegisterId(1)],
                    peak_bytes: 4,
                    sealed: true,
                },
                LatchSummary {
                    id: LatchId(0),
                    resource: ResourceClass::Buffer,
                    occupants: vec![RegisterId(0), RegisterId(2)],
                    peak_bytes: 16,
                    sealed: false,
                },
            ],
        )
    }

    #[test]
    fn lookups() {
        let plan = sample();
        assert_eq!(plan.latch_of(RegisterId(2)), Some(LatchId(0)));
        assert_eq!(plan.latch_of(RegisterId(7)), None);
        assert_eq!(plan.occupants(LatchId(0)), &[RegisterId(0), RegisterId(2)]);
        assert_eq!(plan.latch(LatchId(1)).map(|l| l.sealed), Some(true));
        assert_eq!(plan.assignments().len(), 3);
    }

    #[test]
    fn byte_totals() {
        let plan = sample();
        assert_eq!(plan.reserved_bytes(), 20);
        assert_eq!(plan.unshared_bytes(), 36);
    }

    #[test]
    fn byte_totals_saturate() {
        let mut plan = sample();
        for b in &mut plan.bindings {
            b.bytes = usize::MAX / 2;
        }
        for l in &mut plan.latches {
            l.peak_bytes = usize::MAX / 2;
        }
        assert_eq!(plan.reserved_bytes(), usize::MAX - 1);
        assert_eq!(plan.unshared_bytes(), usize::MAX);
    }

    #[test]
    fn display() {
        let text = sample().to_string();
        assert_eq!(
            text,
            "LatchPlan 'sample' (out-of-order, exact): 3 registers, 2 latches, 20 of 36 bytes\n\
             \x20 L0 buffer 16B open: a, c\n\
             \x20 L1 image u8[2, 2] 4B sealed: b\n"
        );
    }
}
