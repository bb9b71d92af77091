// Property-based tests for planner invariants.
//
// Random kernel DAGs (random fan-in, field sizes, host kernels, recurrence
// kernels with feedback drivers, probes and outputs) are allocated under
// every mode/catalog combination and the plan is re-checked by
// `verify_plan`:
// 1. Totality, safety, and mandatory sealing hold for every plan
// 2. Out-of-order plans stay valid under any ready-set tie-break
// 3. In-order plans stay valid for any linearization they are given
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use kplan::alloc::{allocate, AllocOptions, AllocatorMode, RequiresLatch};
use kplan::ast::synthetic_span;
use kplan::catalog::CatalogPolicy;
use kplan::graph::{Circuit, CircuitBuilder, OutputFlags};
use kplan::id::{KernelId, RegisterId};
use kplan::order::check_linearization;
use kplan::pass::StageCert;
use kplan::types::{AlignedLayout, ElementKind, FieldType, PackedLayout, TargetLayout};
use kplan::verify::verify_plan;
use proptest::prelude::*;
use proptest::sample::Index;

// ── Circuit generator ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct KernelSpec {
    inputs: Vec<Index>,
    outputs: Vec<(usize, bool, bool)>, // (size class, probed, output)
    host: bool,
    /// Recurrence kernel driven by the register `driver` selects, which may
    /// be produced by any kernel, including later ones.
    recurrence: bool,
    driver: Index,
}

fn arb_kernel() -> impl Strategy<Value = KernelSpec> {
    (
        prop::collection::vec(any::<Index>(), 0..3),
        prop::collection::vec(
            (0..3usize, prop::bool::weighted(0.1), prop::bool::weighted(0.1)),
            1..=2,
        ),
        prop::bool::weighted(0.15),
        prop::bool::weighted(0.15),
        any::<Index>(),
    )
        .prop_map(|(inputs, outputs, host, recurrence, driver)| KernelSpec {
            inputs,
            outputs,
            host: host && !recurrence,
            recurrence,
            driver,
        })
}

fn field(class: usize) -> FieldType {
    match class {
        0 => FieldType::buffer(ElementKind::F32, &[16]),
        1 => FieldType::buffer(ElementKind::F32, &[12]),
        _ => FieldType::image(ElementKind::U8, &[8, 8]),
    }
}

/// Kernels read only registers produced earlier, so ordering edges form a
/// DAG. Recurrence kernels take no ordering inputs and produce one
/// register; their drivers are wired once every register exists, so
/// feedback edges may point backwards.
fn build(specs: &[KernelSpec]) -> Circuit {
    let mut b = CircuitBuilder::new("random");
    let mut regs: Vec<RegisterId> = Vec::new();
    let mut drivable: Vec<RegisterId> = Vec::new();
    let mut states: Vec<(KernelId, Index)> = Vec::new();
    for (i, spec) in specs.iter().enumerate() {
        let k = b.declare_kernel(format!("k{i}"), spec.host, spec.recurrence, synthetic_span());
        let outputs = if spec.recurrence {
            states.push((k, spec.driver));
            &spec.outputs[..1]
        } else {
            if !regs.is_empty() {
                for idx in &spec.inputs {
                    b.add_input(k, regs[idx.index(regs.len())]).unwrap();
                }
            }
            &spec.outputs[..]
        };
        for (j, &(class, probed, output)) in outputs.iter().enumerate() {
            let flags = OutputFlags { probed, output };
            let r = b
                .add_output(k, format!("r{i}_{j}"), field(class), flags, synthetic_span())
                .unwrap();
            regs.push(r);
            if !spec.recurrence {
                drivable.push(r);
            }
        }
    }
    if !drivable.is_empty() {
        for (state, driver) in states {
            b.add_input(state, drivable[driver.index(drivable.len())]).unwrap();
        }
    }
    b.finish()
}

fn arb_circuit() -> impl Strategy<Value = Circuit> {
    prop::collection::vec(arb_kernel(), 1..14).prop_map(|specs| build(&specs))
}

/// Kahn's algorithm choosing the ready kernel with the smallest key.
fn keyed_linearization(circuit: &Circuit, keys: &[u32]) -> Vec<KernelId> {
    let n = circuit.kernel_count();
    let mut pending: Vec<usize> = circuit
        .kernels
        .iter()
        .map(|k| circuit.ordering_inputs(k.id).len())
        .collect();
    let mut ready: Vec<KernelId> = circuit
        .kernels
        .iter()
        .filter(|k| pending[k.id.index()] == 0)
        .map(|k| k.id)
        .collect();
    let mut order = Vec::with_capacity(n);
    while !ready.is_empty() {
        let pos = (0..ready.len())
            .min_by_key(|&i| (keys[ready[i].index() % keys.len()], ready[i]))
            .unwrap();
        let k = ready.swap_remove(pos);
        order.push(k);
        for &r in &circuit.kernel(k).outputs {
            for sink in circuit.ordering_sinks(r) {
                pending[sink.index()] -= 1;
                if pending[sink.index()] == 0 {
                    ready.push(sink);
                }
            }
        }
    }
    order
}

fn catalogs() -> [CatalogPolicy; 3] {
    [
        CatalogPolicy::Exact,
        CatalogPolicy::utilization(),
        CatalogPolicy::Utilization {
            min_utilization: 0.8,
        },
    ]
}

fn assert_valid(
    circuit: &Circuit,
    options: &AllocOptions,
    layout: &dyn TargetLayout,
    order: Option<&[KernelId]>,
) {
    let alloc = allocate(circuit, options, layout, &RequiresLatch::All, order)
        .unwrap_or_else(|e| panic!("allocation failed: {e}"));
    let plan = &alloc.plan;
    assert_eq!(plan.bindings.len(), circuit.registers.len());
    assert!(plan.reserved_bytes() <= plan.unshared_bytes());
    let cert = verify_plan(circuit, plan, &RequiresLatch::All);
    assert!(
        cert.all_pass(),
        "failed {:?} for {:?}\n{}\n{}",
        cert.failures(),
        options,
        circuit,
        plan
    );
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn every_plan_verifies(circuit in arb_circuit()) {
        for mode in [AllocatorMode::OutOfOrder, AllocatorMode::InOrder] {
            for catalog in catalogs() {
                let options = AllocOptions { mode, catalog, legacy_check: false };
                assert_valid(&circuit, &options, &PackedLayout, None);
                assert_valid(&circuit, &options, &AlignedLayout::new(32), None);
            }
        }
    }

    #[test]
    fn recurrence_state_exclusion_verifies(circuit in arb_circuit()) {
        let requires = RequiresLatch::ExceptRecurrenceState;
        for mode in [AllocatorMode::OutOfOrder, AllocatorMode::InOrder] {
            let options = AllocOptions { mode, catalog: CatalogPolicy::Exact, legacy_check: false };
            let alloc = allocate(&circuit, &options, &PackedLayout, &requires, None).unwrap();
            for b in &alloc.plan.bindings {
                let reg = circuit.register(b.register);
                prop_assert!(reg.recurrence.is_none());
                prop_assert!(!circuit.kernel(reg.source).recurrence);
            }
            let cert = verify_plan(&circuit, &alloc.plan, &requires);
            prop_assert!(cert.all_pass(), "failed {:?}", cert.failures());
        }
    }

    #[test]
    fn out_of_order_valid_under_any_tie_break(
        circuit in arb_circuit(),
        keys in prop::collection::vec(any::<u32>(), 1..16),
    ) {
        let rank = keyed_linearization(&circuit, &keys);
        prop_assert!(check_linearization(&circuit, &rank).is_ok());
        for catalog in catalogs() {
            let options = AllocOptions {
                mode: AllocatorMode::OutOfOrder,
                catalog,
                legacy_check: false,
            };
            assert_valid(&circuit, &options, &PackedLayout, Some(&rank));
        }
    }

    #[test]
    fn in_order_valid_for_any_linearization(
        circuit in arb_circuit(),
        keys in prop::collection::vec(any::<u32>(), 1..16),
    ) {
        let order = keyed_linearization(&circuit, &keys);
        for catalog in catalogs() {
            let options = AllocOptions {
                mode: AllocatorMode::InOrder,
                catalog,
                legacy_check: true,
            };
            assert_valid(&circuit, &options, &PackedLayout, Some(&order));
        }
    }

    #[test]
    fn out_of_order_is_deterministic(circuit in arb_circuit()) {
        let options = AllocOptions::default();
        let a = allocate(&circuit, &options, &PackedLayout, &RequiresLatch::All, None).unwrap();
        let b = allocate(&circuit, &options, &PackedLayout, &RequiresLatch::All, None).unwrap();
        prop_assert_eq!(a.plan.assignments(), b.plan.assignments());
    }
}

// ── Order sensitivity of the in-order allocator ─────────────────────────────

/// Two independent producers whose outputs are read by one kernel each.
/// Latches are created in launch order, so the map follows the order given.
#[test]
fn in_order_plan_depends_on_supplied_order() {
    let f = FieldType::buffer(ElementKind::F32, &[4]);
    let mut b = CircuitBuilder::new("fork");
    let (_, ra) = b.kernel("a", &[], &[f.clone()]).unwrap();
    let (_, rb) = b.kernel("b", &[], &[f.clone()]).unwrap();
    let (ka, _) = b.kernel("use_a", &[ra[0]], &[f.clone()]).unwrap();
    let (kb, _) = b.kernel("use_b", &[rb[0]], &[f.clone()]).unwrap();
    let c = b.finish();

    let run = |order: &[KernelId]| {
        let options = AllocOptions {
            mode: AllocatorMode::InOrder,
            catalog: CatalogPolicy::Exact,
            legacy_check: false,
        };
        allocate(&c, &options, &PackedLayout, &RequiresLatch::All, Some(order))
            .unwrap()
            .plan
    };
    let first = run(&[KernelId(0), KernelId(1), ka, kb]);
    let second = run(&[KernelId(1), KernelId(0), kb, ka]);
    assert_ne!(first.assignments(), second.assignments());
}
