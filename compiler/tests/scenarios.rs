// Scenario tests: the reference circuits for latch sharing, built through
// the library API and checked against both allocators.

use kplan::alloc::{
    allocate, allocate_in_order, allocate_out_of_order, AllocOptions, AllocatorMode,
    RequiresLatch, SealReason,
};
use kplan::catalog::CatalogPolicy;
use kplan::graph::{Circuit, CircuitBuilder};
use kplan::id::{KernelId, RegisterId};
use kplan::pass::StageCert;
use kplan::plan::LatchPlan;
use kplan::types::{ElementKind, FieldType, PackedLayout};
use kplan::verify::verify_plan;

fn f() -> FieldType {
    FieldType::buffer(ElementKind::F32, &[32])
}

fn out_of_order(circuit: &Circuit) -> LatchPlan {
    allocate_out_of_order(
        circuit,
        None,
        CatalogPolicy::Exact,
        &PackedLayout,
        &RequiresLatch::All,
    )
    .unwrap()
    .plan
}

fn in_order(circuit: &Circuit) -> LatchPlan {
    let order = circuit.postorder();
    allocate_in_order(
        circuit,
        &order,
        CatalogPolicy::Exact,
        &PackedLayout,
        &RequiresLatch::All,
    )
    .unwrap()
    .plan
}

fn both(circuit: &Circuit) -> [LatchPlan; 2] {
    [out_of_order(circuit), in_order(circuit)]
}

fn assert_verified(circuit: &Circuit, plan: &LatchPlan) {
    let cert = verify_plan(circuit, plan, &RequiresLatch::All);
    assert!(cert.all_pass(), "failed obligations: {:?}\n{plan}", cert.failures());
}

fn reg(circuit: &Circuit, name: &str) -> RegisterId {
    circuit.register_by_name(name).unwrap().id
}

fn sealed(plan: &LatchPlan, r: RegisterId) -> bool {
    let latch = plan.latch_of(r).unwrap();
    plan.latch(latch).unwrap().sealed
}

// ── Scenario 1: linear chain ────────────────────────────────────────────────

fn linear_chain() -> Circuit {
    let mut b = CircuitBuilder::new("linear");
    let (_, ra) = b.kernel("a", &[], &[f()]).unwrap();
    let (_, rb) = b.kernel("b", &[ra[0]], &[f()]).unwrap();
    let (_, rc) = b.kernel("c", &[rb[0]], &[f()]).unwrap();
    b.kernel("d", &[rc[0]], &[f()]).unwrap();
    b.finish()
}

#[test]
fn linear_chain_shares_alternate_registers() {
    let c = linear_chain();
    for plan in both(&c) {
        assert_verified(&c, &plan);
        let (a, b, cc, d) = (reg(&c, "a"), reg(&c, "b"), reg(&c, "c"), reg(&c, "d"));
        assert_eq!(plan.latch_of(a), plan.latch_of(cc));
        assert_ne!(plan.latch_of(a), plan.latch_of(b));
        assert_ne!(plan.latch_of(cc), plan.latch_of(d));
        assert!(sealed(&plan, d));
        assert_eq!(plan.binding(d).unwrap().seal, Some(SealReason::Sinkless));
        assert!(plan.latch_count() <= 3);
    }
}

// ── Scenario 2: diamond ─────────────────────────────────────────────────────

fn diamond() -> Circuit {
    let mut b = CircuitBuilder::new("diamond");
    let (_, ra) = b.kernel("a", &[], &[f()]).unwrap();
    let (_, rb) = b.kernel("b", &[ra[0]], &[f()]).unwrap();
    let (_, rc) = b.kernel("c", &[ra[0]], &[f()]).unwrap();
    b.kernel("d", &[rb[0], rc[0]], &[f()]).unwrap();
    b.finish()
}

#[test]
fn diamond_branches_never_share() {
    let c = diamond();
    for plan in both(&c) {
        assert_verified(&c, &plan);
        assert_ne!(plan.latch_of(reg(&c, "b")), plan.latch_of(reg(&c, "c")));
        assert_ne!(plan.latch_of(reg(&c, "a")), plan.latch_of(reg(&c, "b")));
        assert_ne!(plan.latch_of(reg(&c, "a")), plan.latch_of(reg(&c, "c")));
        assert!(sealed(&plan, reg(&c, "d")));
    }
}

// ── Scenario 3: probed register ─────────────────────────────────────────────

fn probe_chain(probed: bool) -> Circuit {
    let mut b = CircuitBuilder::new("probe");
    let (_, ra) = b.kernel("a", &[], &[f()]).unwrap();
    let (_, rb) = b.kernel("b", &[ra[0]], &[f()]).unwrap();
    b.kernel("c", &[rb[0]], &[f()]).unwrap();
    if probed {
        b.mark_probed(rb[0]).unwrap();
    }
    b.finish()
}

#[test]
fn probed_register_seals_where_plain_one_does_not() {
    let plain = probe_chain(false);
    let probed = probe_chain(true);
    for (plain_plan, probed_plan) in both(&plain).into_iter().zip(both(&probed)) {
        assert_verified(&plain, &plain_plan);
        assert_verified(&probed, &probed_plan);

        let b = reg(&plain, "b");
        assert!(!sealed(&plain_plan, b));
        assert!(sealed(&probed_plan, b));
        assert_eq!(probed_plan.binding(b).unwrap().seal, Some(SealReason::Probed));
        // The sealed latch takes no further occupant.
        let latch = probed_plan.latch_of(b).unwrap();
        assert_eq!(probed_plan.occupants(latch).last(), Some(&b));
    }
}

// ── Scenario 4: recurrence ──────────────────────────────────────────────────

/// `state` feeds `a`; `a` drives `state` in the next cycle.
fn recurrence_loop() -> (Circuit, KernelId) {
    let mut b = CircuitBuilder::new("loop");
    let (state, s) = b.recurrence_kernel("state", f()).unwrap();
    let (_, ra) = b.kernel("a", &[s], &[f()]).unwrap();
    b.add_input(state, ra[0]).unwrap();
    b.mark_output(ra[0]).unwrap();
    (b.finish(), state)
}

#[test]
fn recurrence_output_binds_before_its_driver() {
    let (c, state) = recurrence_loop();
    for plan in both(&c) {
        assert_verified(&c, &plan);
        let s = plan.binding(reg(&c, "state")).unwrap();
        assert_eq!(s.kernel, state);
        let pos = |r: RegisterId| plan.bindings.iter().position(|b| b.register == r);
        assert!(pos(reg(&c, "state")) < pos(reg(&c, "a")));
    }
}

#[test]
fn recurrence_state_can_be_excluded() {
    let (c, _) = recurrence_loop();
    let alloc = allocate(
        &c,
        &AllocOptions::default(),
        &PackedLayout,
        &RequiresLatch::ExceptRecurrenceState,
        None,
    )
    .unwrap();
    assert!(alloc.plan.bindings.is_empty());
    let cert = verify_plan(&c, &alloc.plan, &RequiresLatch::ExceptRecurrenceState);
    assert!(cert.all_pass());
}

// ── Mixed resources ─────────────────────────────────────────────────────────

#[test]
fn image_and_buffer_registers_use_separate_latches() {
    let img = FieldType::image(ElementKind::U8, &[16, 16]);
    let mut b = CircuitBuilder::new("mixed");
    let (_, r0) = b.kernel("cap", &[], &[img.clone()]).unwrap();
    let (_, r1) = b
        .kernel("hist", &[r0[0]], &[FieldType::buffer(ElementKind::U8, &[256])])
        .unwrap();
    let (_, r2) = b.kernel("eq", &[r1[0]], &[img.clone()]).unwrap();
    b.kernel("out", &[r2[0]], &[FieldType::buffer(ElementKind::U8, &[256])])
        .unwrap();
    let c = b.finish();

    let options = AllocOptions {
        mode: AllocatorMode::OutOfOrder,
        catalog: CatalogPolicy::utilization(),
        legacy_check: false,
    };
    let plan = allocate(&c, &options, &PackedLayout, &RequiresLatch::All, None)
        .unwrap()
        .plan;
    assert_verified(&c, &plan);
    // Same size, different resource: never shared.
    assert_ne!(plan.latch_of(r0[0]), plan.latch_of(r1[0]));
    // Same image type, non-overlapping lifetimes: shared.
    assert_eq!(plan.latch_of(r0[0]), plan.latch_of(r2[0]));
}
