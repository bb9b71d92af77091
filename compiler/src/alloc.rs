// alloc.rs — Latch sharing allocators
//
// Drives the liveness engine over a circuit and, for every register that
// needs storage, binds it to the first catalog candidate whose last readers
// are all guaranteed to have finished before the producing kernel runs.
// Two variants differ only in how ready kernels are drained:
//
//   in-order      replays a supplied linearization; the plan is valid only
//                 for an engine launching kernels in exactly that sequence.
//   out-of-order  drains dataflow readiness; the plan is valid for any
//                 dependency-respecting launch order.
//
// Preconditions: `circuit` was built through `CircuitBuilder`.
// Postconditions: every register accepted by `RequiresLatch` is bound; every
//                 register matching a seal rule is the final occupant of a
//                 sealed latch.
// Failure modes: malformed graphs or launch sequences →
//                `AllocError::GraphConsistency`.
// Side effects: `log::debug!` per binding, `log::warn!` per legacy
//               disagreement.

use std::fmt;

use serde::Serialize;

use crate::catalog::{CatalogPolicy, LatchCatalog};
use crate::graph::{Circuit, Register};
use crate::id::{IdAllocator, KernelId, LatchId, RegisterId};
use crate::kernel_set::KernelSet;
use crate::latch::{Occupant, OpenLatch, ResourceClass, StorageRequest};
use crate::liveness::{
    AllocError, LivenessEngine, RankedReadyQueue, ReadyPolicy, ReadyQueue, SuppliedOrder,
};
use crate::plan::{Binding, LatchPlan, LatchSummary};
use crate::types::TargetLayout;

// ── Options ─────────────────────────────────────────────────────────────────

/// Execution-ordering assumption the plan must be valid under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocatorMode {
    InOrder,
    #[default]
    OutOfOrder,
}

impl AllocatorMode {
    pub fn name(self) -> &'static str {
        match self {
            AllocatorMode::InOrder => "in-order",
            AllocatorMode::OutOfOrder => "out-of-order",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AllocOptions {
    pub mode: AllocatorMode,
    pub catalog: CatalogPolicy,
    /// In-order only: cross-check each candidate against the "already
    /// executed" criterion and report disagreements.
    pub legacy_check: bool,
}

/// Which registers take part in sharing. Registers rejected here receive
/// dedicated storage elsewhere.
pub enum RequiresLatch<'a> {
    All,
    /// Skip double-buffered recurrence state: recurrence outputs and the
    /// drivers feeding them.
    ExceptRecurrenceState,
    Custom(&'a dyn Fn(&Register) -> bool),
}

impl RequiresLatch<'_> {
    pub fn accepts(&self, circuit: &Circuit, register: &Register) -> bool {
        match self {
            RequiresLatch::All => true,
            RequiresLatch::ExceptRecurrenceState => {
                register.recurrence.is_none() && !circuit.kernel(register.source).recurrence
            }
            RequiresLatch::Custom(pred) => pred(register),
        }
    }
}

impl fmt::Debug for RequiresLatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiresLatch::All => write!(f, "All"),
            RequiresLatch::ExceptRecurrenceState => write!(f, "ExceptRecurrenceState"),
            RequiresLatch::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

// ── Seal rule ───────────────────────────────────────────────────────────────

/// Why binding a register seals its latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SealReason {
    /// Declared circuit output.
    Output,
    /// Nothing reads it within the cycle.
    Sinkless,
    /// Readable from outside the circuit at any time.
    Probed,
    /// Produced by a host kernel.
    HostProducer,
    /// Read by a host kernel.
    HostConsumer,
    /// Read by a recurrence kernel in the next cycle.
    DrivesRecurrence,
}

impl SealReason {
    pub fn name(self) -> &'static str {
        match self {
            SealReason::Output => "output",
            SealReason::Sinkless => "sinkless",
            SealReason::Probed => "probed",
            SealReason::HostProducer => "host-producer",
            SealReason::HostConsumer => "host-consumer",
            SealReason::DrivesRecurrence => "drives-recurrence",
        }
    }
}

/// First seal rule `register` matches, if any.
pub fn seal_reason(circuit: &Circuit, register: &Register) -> Option<SealReason> {
    if register.output {
        Some(SealReason::Output)
    } else if register.sinks.is_empty() {
        Some(SealReason::Sinkless)
    } else if register.probed {
        Some(SealReason::Probed)
    } else if circuit.kernel(register.source).host {
        Some(SealReason::HostProducer)
    } else if register.sinks.iter().any(|&s| circuit.kernel(s).host) {
        Some(SealReason::HostConsumer)
    } else if register.recurrence.is_some() {
        Some(SealReason::DrivesRecurrence)
    } else {
        None
    }
}

// ── Result ──────────────────────────────────────────────────────────────────

/// The legacy "has every reader executed" criterion disagreed with the
/// precursor criterion for one candidate. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyDisagreement {
    pub kernel: KernelId,
    pub register: RegisterId,
    pub latch: LatchId,
    /// The legacy answer; the precursor criterion said the opposite.
    pub legacy_eligible: bool,
}

#[derive(Debug, Clone)]
pub struct Allocation {
    pub plan: LatchPlan,
    pub disagreements: Vec<LegacyDisagreement>,
    /// Most partial precursor sets alive at once during the traversal.
    pub peak_live_sets: usize,
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Allocate under `options.mode`.
///
/// In-order uses `order` as the launch sequence (the graph postorder when
/// `None`). Out-of-order drains dataflow readiness first-come first-served,
/// or ranked by `order` when given; the ranking only breaks ties.
pub fn allocate(
    circuit: &Circuit,
    options: &AllocOptions,
    layout: &dyn TargetLayout,
    requires: &RequiresLatch<'_>,
    order: Option<&[KernelId]>,
) -> Result<Allocation, AllocError> {
    match options.mode {
        AllocatorMode::InOrder => {
            let fallback;
            let order: &[KernelId] = match order {
                Some(o) => o,
                None => {
                    fallback = circuit.postorder();
                    &fallback
                }
            };
            let mut policy = SuppliedOrder::new(order);
            run(circuit, options, layout, requires, &mut policy)
        }
        AllocatorMode::OutOfOrder => match order {
            Some(rank) => {
                let mut policy = RankedReadyQueue::new(circuit.kernel_count(), rank);
                run(circuit, options, layout, requires, &mut policy)
            }
            None => run(circuit, options, layout, requires, &mut ReadyQueue::new()),
        },
    }
}

/// In-order allocation against `order`.
pub fn allocate_in_order(
    circuit: &Circuit,
    order: &[KernelId],
    catalog: CatalogPolicy,
    layout: &dyn TargetLayout,
    requires: &RequiresLatch<'_>,
) -> Result<Allocation, AllocError> {
    let options = AllocOptions {
        mode: AllocatorMode::InOrder,
        catalog,
        legacy_check: false,
    };
    allocate(circuit, &options, layout, requires, Some(order))
}

/// Out-of-order allocation, optionally breaking ready-set ties by `tie_break`.
pub fn allocate_out_of_order(
    circuit: &Circuit,
    tie_break: Option<&[KernelId]>,
    catalog: CatalogPolicy,
    layout: &dyn TargetLayout,
    requires: &RequiresLatch<'_>,
) -> Result<Allocation, AllocError> {
    let options = AllocOptions {
        mode: AllocatorMode::OutOfOrder,
        catalog,
        legacy_check: false,
    };
    allocate(circuit, &options, layout, requires, tie_break)
}

fn run(
    circuit: &Circuit,
    options: &AllocOptions,
    layout: &dyn TargetLayout,
    requires: &RequiresLatch<'_>,
    policy: &mut dyn ReadyPolicy,
) -> Result<Allocation, AllocError> {
    let legacy = options.legacy_check && options.mode == AllocatorMode::InOrder;
    let mut binder = Binder {
        circuit,
        layout,
        requires,
        catalog: options.catalog.build(),
        ids: IdAllocator::new(),
        bindings: Vec::new(),
        executed: legacy.then(|| KernelSet::with_capacity(circuit.kernel_count())),
        disagreements: Vec::new(),
    };
    let peak_live_sets =
        LivenessEngine::new(circuit).run(policy, |k, pre| binder.visit(k, pre))?;

    let latches = binder
        .catalog
        .values()
        .into_iter()
        .map(LatchSummary::from_latch)
        .collect();
    let plan = LatchPlan::new(
        circuit.name.clone(),
        options.mode,
        options.catalog,
        binder.bindings,
        latches,
    );
    log::debug!(
        "alloc: circuit '{}' {} registers -> {} latches",
        circuit.name,
        plan.bindings.len(),
        plan.latch_count()
    );
    Ok(Allocation {
        plan,
        disagreements: binder.disagreements,
        peak_live_sets,
    })
}

// ── Binding ─────────────────────────────────────────────────────────────────

struct Binder<'a> {
    circuit: &'a Circuit,
    layout: &'a dyn TargetLayout,
    requires: &'a RequiresLatch<'a>,
    catalog: Box<dyn LatchCatalog>,
    ids: IdAllocator,
    bindings: Vec<Binding>,
    /// Kernels launched earlier in the sequence (legacy cross-check only).
    executed: Option<KernelSet>,
    disagreements: Vec<LegacyDisagreement>,
}

impl Binder<'_> {
    fn visit(&mut self, kernel: KernelId, precursors: &KernelSet) {
        let circuit = self.circuit;
        for &r in &circuit.kernel(kernel).outputs {
            let register = circuit.register(r);
            if self.requires.accepts(circuit, register) {
                self.bind(kernel, register, precursors);
            }
        }
        if let Some(executed) = self.executed.as_mut() {
            executed.insert(kernel);
        }
    }

    fn bind(&mut self, kernel: KernelId, register: &Register, precursors: &KernelSet) {
        let bytes = self.layout.footprint(&register.field_type);
        let request = StorageRequest {
            resource: ResourceClass::for_field(&register.field_type),
            bytes,
        };

        let mut chosen = None;
        for candidate in self.catalog.get(&request) {
            let eligible = candidate.is_eligible_for(precursors);
            if let Some(executed) = &self.executed {
                let legacy = candidate.last_consumers().is_subset(executed);
                if legacy != eligible {
                    log::warn!(
                        "alloc: legacy check disagrees for {} into {} at {} (legacy={}, precursors={})",
                        register.id,
                        candidate.id(),
                        kernel,
                        legacy,
                        eligible
                    );
                    self.disagreements.push(LegacyDisagreement {
                        kernel,
                        register: register.id,
                        latch: candidate.id(),
                        legacy_eligible: legacy,
                    });
                }
            }
            if eligible {
                chosen = Some(candidate.id());
                break;
            }
        }

        let latch = match chosen.and_then(|id| self.catalog.take(id)) {
            Some(open) => open,
            None => OpenLatch::new(self.ids.alloc_latch(), request.resource),
        };
        let latch_id = latch.id();
        let mut sinks = KernelSet::with_capacity(self.circuit.kernel_count());
        sinks.extend(register.sinks.iter().copied());
        let seal = seal_reason(self.circuit, register);
        log::debug!(
            "alloc: {} {} -> {}{}{}",
            kernel,
            register.name,
            latch_id,
            if chosen.is_some() { " (shared)" } else { "" },
            seal.map(|s| format!(" sealed: {}", s.name())).unwrap_or_default()
        );

        self.catalog.add_latch(latch.bind(
            Occupant {
                register: register.id,
                sinks,
                bytes,
            },
            seal.is_some(),
        ));
        self.bindings.push(Binding {
            register: register.id,
            name: register.name.clone(),
            kernel,
            latch: latch_id,
            bytes,
            seal,
        });
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
