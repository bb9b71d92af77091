// order.rs — Dependency ordering of kernels
//
// Produces linearizations of a circuit: sequences in which every kernel
// appears after the producers of all of its ordering (non-recurrence)
// inputs. The in-order allocator uses one verbatim as the launch sequence;
// the out-of-order allocator may use one as a tie-break ranking.
//
// Preconditions: `circuit` was built through `CircuitBuilder`.
// Postconditions: `linearize` returns every kernel exactly once.
// Failure modes: ordering cycles → `OrderError::Cycle`.
// Side effects: none.

use std::collections::VecDeque;

use thiserror::Error;

use crate::graph::Circuit;
use crate::id::{KernelId, RegisterId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("{} kernel(s) on an unresolvable dependency cycle ({})", .stuck.len(), list(.stuck))]
    Cycle { stuck: Vec<KernelId> },
    #[error("kernel {kernel} is placed before the producer of its input {input}")]
    NotTopological { kernel: KernelId, input: RegisterId },
    #[error("kernel {0} appears more than once")]
    Duplicate(KernelId),
    #[error("kernel {0} is missing from the order")]
    Missing(KernelId),
    #[error("kernel {0} is not part of the circuit")]
    Unknown(KernelId),
}

fn list(ids: &[KernelId]) -> String {
    ids.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Kahn's algorithm ────────────────────────────────────────────────────────

/// Topological order with ties broken by ascending kernel id.
pub fn linearize(circuit: &Circuit) -> Result<Vec<KernelId>, OrderError> {
    let n = circuit.kernel_count();
    let mut in_degree: Vec<usize> = circuit
        .kernels
        .iter()
        .map(|k| circuit.ordering_inputs(k.id).len())
        .collect();

    let mut queue: VecDeque<KernelId> = circuit
        .kernels
        .iter()
        .filter(|k| in_degree[k.id.index()] == 0)
        .map(|k| k.id)
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(k) = queue.pop_front() {
        order.push(k);
        let mut next: Vec<KernelId> = Vec::new();
        for &r in &circuit.kernel(k).outputs {
            for sink in circuit.ordering_sinks(r) {
                let deg = &mut in_degree[sink.index()];
                *deg -= 1;
                if *deg == 0 {
                    next.push(sink);
                }
            }
        }
        next.sort();
        queue.extend(next);
    }

    if order.len() < n {
        let mut placed = vec![false; n];
        for k in &order {
            placed[k.index()] = true;
        }
        let stuck = circuit
            .kernels
            .iter()
            .map(|k| k.id)
            .filter(|k| !placed[k.index()])
            .collect();
        return Err(OrderError::Cycle { stuck });
    }
    Ok(order)
}

/// The graph postorder, checked to be a valid linearization.
///
/// On a DAG the postorder always passes. On a cyclic circuit it still lists
/// every kernel once but puts one kernel of each cycle before its producer;
/// Kahn's algorithm then reports the kernels stuck on the cycle.
pub fn linearize_postorder(circuit: &Circuit) -> Result<Vec<KernelId>, OrderError> {
    let order = circuit.postorder();
    match check_linearization(circuit, &order) {
        Ok(()) => Ok(order),
        Err(_) => linearize(circuit),
    }
}

/// Validate that `order` lists every kernel once, each after the producers
/// of its ordering inputs.
pub fn check_linearization(circuit: &Circuit, order: &[KernelId]) -> Result<(), OrderError> {
    let n = circuit.kernel_count();
    let mut placed = vec![false; n];
    for &k in order {
        if k.index() >= n {
            return Err(OrderError::Unknown(k));
        }
        if placed[k.index()] {
            return Err(OrderError::Duplicate(k));
        }
        for &input in circuit.ordering_inputs(k) {
            let producer = circuit.register(input).source;
            if !placed[producer.index()] {
                return Err(OrderError::NotTopological { kernel: k, input });
            }
        }
        placed[k.index()] = true;
    }
    if let Some(missing) = placed.iter().position(|p| !p) {
        return Err(OrderError::Missing(KernelId(missing as u32)));
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
