// pipeline.rs — Compilation state and pass orchestration
//
// Holds every pass artifact and runs the minimal set of passes for a given
// terminal PassId: build_circuit → order → allocate → verify.
//
// Preconditions: the document has been parsed without errors.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::Instant;

use serde::Serialize;

use crate::alloc::{allocate, AllocatorMode, Allocation, LegacyDisagreement, RequiresLatch};
use crate::ast::{synthetic_span, Document, Span};
use crate::diag::codes;
use crate::diag::{DiagLevel, Diagnostic};
use crate::graph::Circuit;
use crate::id::KernelId;
use crate::liveness::AllocError;
use crate::lower::{lower, Settings, SettingsOverrides};
use crate::order::{linearize_postorder, OrderError};
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::plan::LatchPlan;
use crate::verify::{verify_plan, PlanCert};

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible plans.
///
/// `source_hash`: SHA-256 of the raw `.kc` source text.
/// `options_fingerprint`: SHA-256 of the compact JSON of the merged settings.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub options_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the options fingerprint (64 characters).
    pub fn options_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.options_fingerprint)
    }
}

impl Serialize for Provenance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Provenance", 3)?;
        s.serialize_field("source_hash", &self.source_hash_hex())?;
        s.serialize_field("options_fingerprint", &self.options_fingerprint_hex())?;
        s.serialize_field("compiler_version", self.compiler_version)?;
        s.end()
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and merged settings.
pub fn compute_provenance(source: &str, settings: &Settings) -> Provenance {
    // Settings hold only plain scalars; serialization cannot fail.
    let canonical = serde_json::to_string(settings).unwrap_or_default();
    Provenance {
        source_hash: sha256(source.as_bytes()),
        options_fingerprint: sha256(canonical.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compilation state ──────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub document: Document,
    pub overrides: SettingsOverrides,
    pub circuit: Option<Circuit>,
    pub settings: Option<Settings>,
    pub order: Option<Vec<KernelId>>,
    pub allocation: Option<Allocation>,
    pub cert: Option<PlanCert>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(document: Document, overrides: SettingsOverrides) -> Self {
        Self {
            document,
            overrides,
            circuit: None,
            settings: None,
            order: None,
            allocation: None,
            cert: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    pub failing_pass: PassId,
}

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass_core(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "kplan: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// The pass ran before its inputs existed. `required_passes` rules this out.
fn missing_input(pass_id: PassId) -> PipelineError {
    PipelineError {
        failing_pass: pass_id,
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::BuildCircuit => {
                let result = lower(&state.document, &state.overrides);
                state.circuit = Some(result.circuit);
                state.settings = Some(result.settings);
                result.diagnostics
            }
            PassId::Order => {
                let circuit = state.circuit.as_ref().ok_or_else(|| missing_input(pass_id))?;
                match linearize_postorder(circuit) {
                    Ok(order) => {
                        state.order = Some(order);
                        Vec::new()
                    }
                    Err(e) => vec![order_diagnostic(circuit, &e)],
                }
            }
            PassId::Allocate => {
                let (Some(circuit), Some(settings), Some(order)) =
                    (&state.circuit, &state.settings, &state.order)
                else {
                    return Err(missing_input(pass_id));
                };
                let options = settings.alloc_options();
                let layout = settings.layout();
                // Out-of-order plans are computed from the ready set alone.
                let supplied = match options.mode {
                    AllocatorMode::InOrder => Some(order.as_slice()),
                    AllocatorMode::OutOfOrder => None,
                };
                match allocate(circuit, &options, &layout, &RequiresLatch::All, supplied) {
                    Ok(allocation) => {
                        let diags = allocation
                            .disagreements
                            .iter()
                            .map(|d| disagreement_diagnostic(circuit, d))
                            .collect();
                        state.allocation = Some(allocation);
                        diags
                    }
                    Err(e) => vec![alloc_diagnostic(circuit, &e)],
                }
            }
            PassId::Verify => {
                let (Some(circuit), Some(allocation)) = (&state.circuit, &state.allocation) else {
                    return Err(missing_input(pass_id));
                };
                let cert = verify_plan(circuit, &allocation.plan, &RequiresLatch::All);
                let diags = if cert.all_pass() {
                    Vec::new()
                } else {
                    vec![Diagnostic::new(
                        DiagLevel::Error,
                        synthetic_span(),
                        format!(
                            "plan verification failed: {}",
                            cert.failures().join(", ")
                        ),
                    )
                    .with_code(codes::E0400)]
                };
                state.cert = Some(cert);
                diags
            }
        };
        let elapsed = t.elapsed();
        finish_pass_core(state, pass_id, diags, elapsed, verbose, &mut on_pass_complete)?;
    }
    Ok(())
}

// ── Error → diagnostic conversion ──────────────────────────────────────────

fn kernel_span(circuit: &Circuit, kernel: KernelId) -> Span {
    circuit
        .kernels
        .get(kernel.index())
        .map(|k| k.span)
        .unwrap_or_else(synthetic_span)
}

fn order_diagnostic(circuit: &Circuit, err: &OrderError) -> Diagnostic {
    let stuck: &[KernelId] = match err {
        OrderError::Cycle { stuck } => stuck,
        _ => &[],
    };
    let span = stuck
        .first()
        .map(|&k| kernel_span(circuit, k))
        .unwrap_or_else(synthetic_span);
    let mut d = Diagnostic::new(DiagLevel::Error, span, err.to_string())
        .with_code(codes::E0200)
        .with_hint("feedback must go through a recurrence kernel");
    for &k in stuck.iter().skip(1) {
        d = d.with_related(
            kernel_span(circuit, k),
            format!("kernel '{}' is on the cycle", circuit.kernel(k).name),
        );
    }
    d
}

fn alloc_diagnostic(circuit: &Circuit, err: &AllocError) -> Diagnostic {
    let AllocError::GraphConsistency {
        kernel, register, ..
    } = err;
    let mut d = Diagnostic::new(DiagLevel::Error, kernel_span(circuit, *kernel), err.to_string())
        .with_code(codes::E0300);
    let waiting = circuit.kernels.get(kernel.index());
    let reg = register.and_then(|r| circuit.registers.get(r.index()));
    if let (Some(k), Some(reg)) = (waiting, reg) {
        d = d.with_cause(
            format!("kernel '{}' waits on register '{}'", k.name, reg.name),
            Some(reg.span),
        );
    }
    d
}

fn disagreement_diagnostic(circuit: &Circuit, d: &LegacyDisagreement) -> Diagnostic {
    let reg = circuit.register(d.register);
    let verdict = if d.legacy_eligible {
        "eligible"
    } else {
        "ineligible"
    };
    Diagnostic::new(
        DiagLevel::Warning,
        reg.span,
        format!(
            "legacy check judges {} {verdict} for register '{}' at kernel '{}'",
            d.latch,
            reg.name,
            circuit.kernel(d.kernel).name
        ),
    )
    .with_code(codes::W0300)
}

// ── JSON report ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct PlanReport<'a> {
    provenance: &'a Provenance,
    settings: &'a Settings,
    plan: &'a LatchPlan,
    disagreements: &'a [LegacyDisagreement],
    peak_live_sets: usize,
}

/// Serialize the finished plan with its provenance and settings.
pub fn plan_report_json(
    provenance: &Provenance,
    settings: &Settings,
    allocation: &Allocation,
) -> Result<String, serde_json::Error> {
    let report = PlanReport {
        provenance,
        settings,
        plan: &allocation.plan,
        disagreements: &allocation.disagreements,
        peak_live_sets: allocation.peak_live_sets,
    };
    let mut json = serde_json::to_string_pretty(&report)?;
    json.push('\n');
    Ok(json)
}

// ── Tests ──────────────────────────────────────────────────────────────────
