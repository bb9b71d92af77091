// liveness.rs — Precursor computation over one traversal of a circuit
//
// Walks the kernels of a circuit in a dataflow-legal order, maintaining for
// each not-yet-processed kernel the set of kernels guaranteed to have
// finished before it runs (its precursors). The order in which ready
// kernels are drained is supplied by a `ReadyPolicy`; the engine itself only
// tracks readiness and propagates precursor sets.
//
// Preconditions: `circuit` was built through `CircuitBuilder`.
// Postconditions: on `Ok`, the visitor has seen every kernel exactly once,
//                 each with its complete precursor set.
// Failure modes: kernels that never become ready, or a ready policy that
//                dequeues a kernel early, twice, or not at all →
//                `AllocError::GraphConsistency`.
// Side effects: none.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use thiserror::Error;

use crate::graph::Circuit;
use crate::id::{CircuitId, KernelId, RegisterId};
use crate::kernel_set::KernelSet;

// ── Errors ──────────────────────────────────────────────────────────────────

/// What went wrong in a graph consistency violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConsistencyFault {
    #[error("kernel never became ready (cyclic or malformed dependency)")]
    NeverReady,
    #[error("supplied order launches the kernel before its inputs are produced")]
    NotReady,
    #[error("supplied order launches the kernel more than once")]
    LaunchedTwice,
    #[error("supplied order names a kernel that is not in the circuit")]
    UnknownKernel,
    #[error("supplied order ends before the kernel is launched")]
    MissingFromOrder,
}

/// Fatal allocation errors. These indicate a malformed circuit or a bad
/// launch sequence from an upstream stage, never a user condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("graph consistency violation in circuit {circuit} at kernel {kernel}{}: {fault}", at_register(.register))]
    GraphConsistency {
        circuit: CircuitId,
        kernel: KernelId,
        register: Option<RegisterId>,
        fault: ConsistencyFault,
    },
}

fn at_register(register: &Option<RegisterId>) -> String {
    match register {
        Some(r) => format!(" (waiting on {r})"),
        None => String::new(),
    }
}

// ── Ready policies ──────────────────────────────────────────────────────────

/// Strategy deciding which ready kernel the engine processes next.
pub trait ReadyPolicy {
    /// `kernel` has had every ordering input produced.
    fn on_ready(&mut self, kernel: KernelId);

    /// The next kernel to process, or `None` once drained.
    fn next_kernel(&mut self) -> Option<KernelId>;

    /// Fault to report for kernels still unprocessed after draining.
    fn drained_fault(&self) -> ConsistencyFault;
}

/// Replays an externally supplied launch sequence. Every dequeued kernel
/// must already be ready.
#[derive(Debug, Clone)]
pub struct SuppliedOrder {
    order: Vec<KernelId>,
    pos: usize,
}

impl SuppliedOrder {
    pub fn new(order: &[KernelId]) -> Self {
        SuppliedOrder {
            order: order.to_vec(),
            pos: 0,
        }
    }
}

impl ReadyPolicy for SuppliedOrder {
    fn on_ready(&mut self, _kernel: KernelId) {}

    fn next_kernel(&mut self) -> Option<KernelId> {
        let k = self.order.get(self.pos).copied();
        self.pos += 1;
        k
    }

    fn drained_fault(&self) -> ConsistencyFault {
        ConsistencyFault::MissingFromOrder
    }
}

/// First-come first-served over dataflow readiness.
#[derive(Debug, Clone, Default)]
pub struct ReadyQueue {
    queue: VecDeque<KernelId>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadyPolicy for ReadyQueue {
    fn on_ready(&mut self, kernel: KernelId) {
        self.queue.push_back(kernel);
    }

    fn next_kernel(&mut self) -> Option<KernelId> {
        self.queue.pop_front()
    }

    fn drained_fault(&self) -> ConsistencyFault {
        ConsistencyFault::NeverReady
    }
}

/// Dataflow readiness with ties among ready kernels broken by position in a
/// reference linearization. Kernels absent from it rank after all listed
/// ones, by id.
#[derive(Debug, Clone)]
pub struct RankedReadyQueue {
    rank: Vec<usize>,
    heap: BinaryHeap<Reverse<(usize, KernelId)>>,
}

impl RankedReadyQueue {
    pub fn new(kernel_count: usize, linearization: &[KernelId]) -> Self {
        let mut rank: Vec<usize> = (0..kernel_count).map(|i| kernel_count + i).collect();
        for (pos, k) in linearization.iter().enumerate() {
            if let Some(slot) = rank.get_mut(k.index()) {
                *slot = (*slot).min(pos);
            }
        }
        RankedReadyQueue {
            rank,
            heap: BinaryHeap::new(),
        }
    }
}

impl ReadyPolicy for RankedReadyQueue {
    fn on_ready(&mut self, kernel: KernelId) {
        let rank = self.rank.get(kernel.index()).copied().unwrap_or(usize::MAX);
        self.heap.push(Reverse((rank, kernel)));
    }

    fn next_kernel(&mut self) -> Option<KernelId> {
        self.heap.pop().map(|Reverse((_, k))| k)
    }

    fn drained_fault(&self) -> ConsistencyFault {
        ConsistencyFault::NeverReady
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// Scratch state for one traversal.
pub struct LivenessEngine<'c> {
    circuit: &'c Circuit,
    /// Partial precursor set per kernel; taken when the kernel is processed.
    precursors: Vec<Option<KernelSet>>,
    /// Ordering inputs whose producer has not been processed yet.
    pending: Vec<usize>,
    processed: Vec<bool>,
    remaining: usize,
    /// Number of `Some` entries in `precursors`.
    live_sets: usize,
    peak_live_sets: usize,
}

impl<'c> LivenessEngine<'c> {
    pub fn new(circuit: &'c Circuit) -> Self {
        let n = circuit.kernel_count();
        let pending = circuit
            .kernels
            .iter()
            .map(|k| circuit.ordering_inputs(k.id).len())
            .collect();
        LivenessEngine {
            circuit,
            precursors: vec![None; n],
            pending,
            processed: vec![false; n],
            remaining: n,
            live_sets: 0,
            peak_live_sets: 0,
        }
    }

    /// Drain `policy`, calling `visit(k, precursors(k))` once per kernel
    /// before its precursors are propagated. Returns the largest number of
    /// partial precursor sets alive at once.
    pub fn run<P, F>(mut self, policy: &mut P, mut visit: F) -> Result<usize, AllocError>
    where
        P: ReadyPolicy + ?Sized,
        F: FnMut(KernelId, &KernelSet),
    {
        // Leaves and recurrence kernels, in id order.
        for k in &self.circuit.kernels {
            if self.pending[k.id.index()] == 0 {
                policy.on_ready(k.id);
            }
        }

        while let Some(k) = policy.next_kernel() {
            if k.index() >= self.circuit.kernel_count() {
                return Err(self.violation(k, None, ConsistencyFault::UnknownKernel));
            }
            if self.processed[k.index()] {
                return Err(self.violation(k, None, ConsistencyFault::LaunchedTwice));
            }
            if self.pending[k.index()] > 0 {
                let waiting = self.blocking_input(k);
                return Err(self.violation(k, waiting, ConsistencyFault::NotReady));
            }
            self.process(k, policy, &mut visit);
        }

        if self.remaining > 0 {
            if let Some(k) = self.processed.iter().position(|p| !p) {
                let k = KernelId(k as u32);
                let waiting = self.blocking_input(k);
                return Err(self.violation(k, waiting, policy.drained_fault()));
            }
        }
        Ok(self.peak_live_sets)
    }

    fn process<P, F>(&mut self, k: KernelId, policy: &mut P, visit: &mut F)
    where
        P: ReadyPolicy + ?Sized,
        F: FnMut(KernelId, &KernelSet),
    {
        let circuit = self.circuit;
        let n = circuit.kernel_count();
        let precursors = match self.precursors[k.index()].take() {
            Some(set) => {
                self.live_sets -= 1;
                set
            }
            None => KernelSet::with_capacity(n),
        };
        log::trace!("liveness: {} precursors={:?}", k, precursors);
        visit(k, &precursors);

        let mut propagated = precursors;
        propagated.insert(k);

        // Distinct ordering sinks, in first-appearance order.
        let mut seen = KernelSet::with_capacity(n);
        let mut targets = Vec::new();
        for &r in &circuit.kernel(k).outputs {
            for sink in circuit.ordering_sinks(r) {
                if seen.insert(sink) {
                    targets.push(sink);
                }
            }
        }
        if let Some((&last, rest)) = targets.split_last() {
            for &sink in rest {
                if let Some(existing) = self.precursors[sink.index()].as_mut() {
                    existing.union_with(&propagated);
                } else {
                    self.precursors[sink.index()] = Some(propagated.clone());
                    self.live_sets += 1;
                }
            }
            if let Some(existing) = self.precursors[last.index()].as_mut() {
                existing.union_with(&propagated);
            } else {
                self.precursors[last.index()] = Some(propagated);
                self.live_sets += 1;
            }
        }

        for &r in &circuit.kernel(k).outputs {
            for sink in circuit.ordering_sinks(r) {
                let pending = &mut self.pending[sink.index()];
                *pending -= 1;
                if *pending == 0 {
                    policy.on_ready(sink);
                }
            }
        }

        self.processed[k.index()] = true;
        self.remaining -= 1;
        self.peak_live_sets = self.peak_live_sets.max(self.live_sets);
    }

    /// First ordering input of `k` whose producer has not been processed.
    fn blocking_input(&self, k: KernelId) -> Option<RegisterId> {
        self.circuit
            .ordering_inputs(k)
            .iter()
            .copied()
            .find(|&r| !self.processed[self.circuit.register(r).source.index()])
    }

    fn violation(
        &self,
        kernel: KernelId,
        register: Option<RegisterId>,
        fault: ConsistencyFault,
    ) -> AllocError {
        AllocError::GraphConsistency {
            circuit: self.circuit.id,
            kernel,
            register,
            fault,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
