// pass.rs — Planner pass descriptors and dependency resolution
//
// Declares the planner's passes (parse is outside the runner), their
// dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each planner pass (parsing runs before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    BuildCircuit,
    Order,
    Allocate,
    Verify,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Circuit,  // Circuit
    Settings, // Settings
    Order,    // Vec<KernelId>
    Plan,     // Allocation
    Cert,     // PlanCert
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a planner pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Postconditions, documentation only.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::BuildCircuit => PassDescriptor {
            name: "build_circuit",
            inputs: &[],
            outputs: &[ArtifactId::Circuit, ArtifactId::Settings],
            invariants: "all names resolved, sink lists mirror inputs",
        },
        PassId::Order => PassDescriptor {
            name: "order",
            inputs: &[PassId::BuildCircuit],
            outputs: &[ArtifactId::Order],
            invariants: "every kernel after the producers of its ordering inputs",
        },
        PassId::Allocate => PassDescriptor {
            name: "allocate",
            inputs: &[PassId::Order],
            outputs: &[ArtifactId::Plan],
            invariants: "every latch-requiring register bound",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::Allocate],
            outputs: &[ArtifactId::Cert],
            invariants: "plan passes every verifier obligation",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::BuildCircuit,
    PassId::Order,
    PassId::Allocate,
    PassId::Verify,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a pass met its postconditions.
pub trait StageCert {
    /// True if every obligation holds.
    fn all_pass(&self) -> bool;

    /// Each obligation's name and outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of failed obligations.
    fn failures(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
