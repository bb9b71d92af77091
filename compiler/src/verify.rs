// verify.rs — Independent plan verification
//
// Re-checks a finished plan against the circuit without reusing any state
// from the allocation pass. Ancestor sets are recomputed from a fresh
// topological order, so a bug in precursor propagation cannot hide itself.
//
// Preconditions: `plan` was produced for `circuit`.
// Postconditions: `PlanCert` records each obligation's outcome.
// Failure modes: none (failures are recorded, not raised).
// Side effects: none.

use crate::alloc::{seal_reason, RequiresLatch};
use crate::graph::Circuit;
use crate::kernel_set::KernelSet;
use crate::latch::ResourceClass;
use crate::order::linearize;
use crate::pass::StageCert;
use crate::plan::LatchPlan;

/// Machine-checkable evidence for plan postconditions (P1-P4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCert {
    /// P1: Exactly the latch-requiring registers are bound, each once, to a
    /// latch that lists it as an occupant.
    pub p1_totality: bool,
    /// P2: For consecutive occupants r1, r2 of a latch, every reader of r1
    /// is an ancestor of r2's producer.
    pub p2_safety: bool,
    /// P3: Registers matching a seal rule are the final occupant of a sealed
    /// latch.
    pub p3_mandatory_sealing: bool,
    /// P4: Every occupant's resource class equals its latch's.
    pub p4_resource_separation: bool,
}

impl StageCert for PlanCert {
    fn all_pass(&self) -> bool {
        self.p1_totality && self.p2_safety && self.p3_mandatory_sealing && self.p4_resource_separation
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("P1_totality", self.p1_totality),
            ("P2_safety", self.p2_safety),
            ("P3_mandatory_sealing", self.p3_mandatory_sealing),
            ("P4_resource_separation", self.p4_resource_separation),
        ]
    }
}

pub fn verify_plan(circuit: &Circuit, plan: &LatchPlan, requires: &RequiresLatch<'_>) -> PlanCert {
    PlanCert {
        p1_totality: check_totality(circuit, plan, requires),
        p2_safety: check_safety(circuit, plan),
        p3_mandatory_sealing: check_sealing(circuit, plan),
        p4_resource_separation: check_resources(circuit, plan),
    }
}

fn check_totality(circuit: &Circuit, plan: &LatchPlan, requires: &RequiresLatch<'_>) -> bool {
    let mut bound = vec![0usize; circuit.registers.len()];
    for b in &plan.bindings {
        match bound.get_mut(b.register.index()) {
            Some(count) => *count += 1,
            None => return false,
        }
        if !plan.occupants(b.latch).contains(&b.register) {
            return false;
        }
    }
    circuit.registers.iter().all(|r| {
        let expected = usize::from(requires.accepts(circuit, r));
        bound[r.id.index()] == expected
    })
}

/// Ancestors of each kernel over ordering edges, or `None` for a cyclic
/// circuit.
fn ancestors(circuit: &Circuit) -> Option<Vec<KernelSet>> {
    let order = linearize(circuit).ok()?;
    let n = circuit.kernel_count();
    let mut anc = vec![KernelSet::with_capacity(n); n];
    for k in order {
        let mut set = KernelSet::with_capacity(n);
        for &input in circuit.ordering_inputs(k) {
            let producer = circuit.register(input).source;
            set.union_with(&anc[producer.index()]);
            set.insert(producer);
        }
        anc[k.index()] = set;
    }
    Some(anc)
}

fn check_safety(circuit: &Circuit, plan: &LatchPlan) -> bool {
    let Some(anc) = ancestors(circuit) else {
        return false;
    };
    // Consecutive pairs suffice: a reader of r1 that precedes r2's producer
    // also precedes every later occupant's producer.
    plan.latches.iter().all(|latch| {
        latch.occupants.windows(2).all(|pair| {
            let (r1, r2) = (circuit.register(pair[0]), circuit.register(pair[1]));
            let before = &anc[r2.source.index()];
            r1.sinks.iter().all(|&s| before.contains(s))
        })
    })
}

fn check_sealing(circuit: &Circuit, plan: &LatchPlan) -> bool {
    plan.bindings.iter().all(|b| {
        if seal_reason(circuit, circuit.register(b.register)).is_none() {
            return true;
        }
        plan.latch(b.latch)
            .is_some_and(|l| l.sealed && l.occupants.last() == Some(&b.register))
    })
}

fn check_resources(circuit: &Circuit, plan: &LatchPlan) -> bool {
    plan.latches.iter().all(|latch| {
        latch.occupants.iter().all(|&r| {
            ResourceClass::for_field(&circuit.register(r).field_type) == latch.resource
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{allocate_out_of_order, AllocatorMode};
    use crate::catalog::CatalogPolicy;
    use crate::graph::CircuitBuilder;
    use crate::id::{KernelId, LatchId, RegisterId};
    use crate::plan::{Binding, LatchSummary};
    use crate::types::{ElementKind, FieldType, PackedLayout};

    fn f() -> FieldType {
        FieldType::buffer(ElementKind::F32, &[4])
    }

    /// a → b → c, c sinkless.
    fn chain() -> Circuit {
        let mut b = CircuitBuilder::new("chain");
        let (_, ra) = b.kernel("a", &[], &[f()]).unwrap();
        let (_, rb) = b.kernel("b", &[ra[0]], &[f()]).unwrap();
        b.kernel("c", &[rb[0]], &[f()]).unwrap();
        b.finish()
    }

    fn binding(reg: u32, latch: u32) -> Binding {
        Binding {
            register: RegisterId(reg),
            name: format!("r{reg}"),
            kernel: KernelId(reg),
            latch: LatchId(latch),
            bytes: 16,
            seal: None,
        }
    }

    fn summary(id: u32, occupants: &[u32], sealed: bool) -> LatchSummary {
        LatchSummary {
            id: LatchId(id),
            resource: ResourceClass::Buffer,
            occupants: occupants.iter().map(|&r| RegisterId(r)).collect(),
            peak_bytes: 16,
            sealed,
        }
    }

    fn plan(bindings: Vec<Binding>, latches: Vec<LatchSummary>) -> LatchPlan {
        LatchPlan::new(
            "chain",
            AllocatorMode::OutOfOrder,
            CatalogPolicy::Exact,
            bindings,
            latches,
        )
    }

    #[test]
    fn allocator_output_passes() {
        let c = chain();
        let alloc = allocate_out_of_order(
            &c,
            None,
            CatalogPolicy::Exact,
            &PackedLayout,
            &RequiresLatch::All,
        )
        .unwrap();
        let cert = verify_plan(&c, &alloc.plan, &RequiresLatch::All);
        assert!(cert.all_pass(), "{:?}", cert.failures());
    }

    #[test]
    fn missing_binding_fails_totality() {
        let c = chain();
        let p = plan(
            vec![binding(0, 0), binding(1, 1)],
            vec![summary(0, &[0], false), summary(1, &[1], false)],
        );
        let cert = verify_plan(&c, &p, &RequiresLatch::All);
        assert!(!cert.p1_totality);
        assert_eq!(cert.failures(), vec!["P1_totality"]);
    }

    #[test]
    fn overlapping_lifetimes_fail_safety() {
        // a and b share while b's producer reads a.
        let c = chain();
        let p = plan(
            vec![binding(0, 0), binding(1, 0), binding(2, 1)],
            vec![summary(0, &[0, 1], false), summary(1, &[2], true)],
        );
        let cert = verify_plan(&c, &p, &RequiresLatch::All);
        assert!(cert.p1_totality);
        assert!(!cert.p2_safety);
        assert!(cert.p3_mandatory_sealing);
    }

    #[test]
    fn unsealed_root_fails_sealing() {
        let c = chain();
        let p = plan(
            vec![binding(0, 0), binding(1, 1), binding(2, 0)],
            vec![summary(0, &[0, 2], false), summary(1, &[1], false)],
        );
        let cert = verify_plan(&c, &p, &RequiresLatch::All);
        assert!(cert.p2_safety);
        assert!(!cert.p3_mandatory_sealing);
    }

    #[test]
    fn image_in_buffer_latch_fails_separation() {
        let mut b = CircuitBuilder::new("img");
        b.kernel("a", &[], &[FieldType::image(ElementKind::U8, &[4, 4])])
            .unwrap();
        let c = b.finish();
        let p = plan(vec![binding(0, 0)], vec![summary(0, &[0], true)]);
        let cert = verify_plan(&c, &p, &RequiresLatch::All);
        assert!(!cert.p4_resource_separation);
        assert!(cert.p1_totality && cert.p2_safety && cert.p3_mandatory_sealing);
    }
}
