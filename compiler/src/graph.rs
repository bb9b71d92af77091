// graph.rs — Kernel/register dataflow graph
//
// A circuit is a DAG of kernels connected by virtual registers. Each register
// is produced by exactly one kernel output position and read by any number of
// sink kernels. Recurrence kernels read their drivers across the cycle
// boundary, so those reads do not order kernels within a cycle.
//
// Preconditions: kernels and registers are added through `CircuitBuilder`.
// Postconditions: sink lists mirror kernel input lists exactly; ids are dense.
// Failure modes: references to unknown kernels/registers → `BuildError`.
// Side effects: none.

use std::fmt;

use thiserror::Error;

use crate::ast::{synthetic_span, Span};
use crate::id::{CircuitId, KernelId, RegisterId};
use crate::types::FieldType;

// ── Public types ────────────────────────────────────────────────────────────

/// A computation node.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub id: KernelId,
    pub name: String,
    /// Registers read, in argument order.
    pub inputs: Vec<RegisterId>,
    /// Registers produced, in result order.
    pub outputs: Vec<RegisterId>,
    /// Host-side (CPU) kernel.
    pub host: bool,
    /// Feedback kernel: its inputs are next-cycle drivers.
    pub recurrence: bool,
    pub span: Span,
}

/// The value produced by one kernel output position.
#[derive(Debug, Clone)]
pub struct Register {
    pub id: RegisterId,
    pub name: String,
    pub source: KernelId,
    /// One entry per consuming input position (a kernel reading the same
    /// register twice appears twice).
    pub sinks: Vec<KernelId>,
    pub field_type: FieldType,
    /// May be read from outside the circuit at an arbitrary time.
    pub probed: bool,
    /// Declared circuit output.
    pub output: bool,
    /// Recurrence kernel this register drives, if any.
    pub recurrence: Option<KernelId>,
    pub span: Span,
}

impl Register {
    /// Declared output, or nothing downstream reads it in this cycle.
    pub fn is_root(&self) -> bool {
        self.output || self.sinks.is_empty()
    }
}

/// Flags of an output register added through the builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputFlags {
    pub probed: bool,
    pub output: bool,
}

/// Construction-time shape errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("unknown kernel {0}")]
    UnknownKernel(KernelId),
    #[error("unknown register {0}")]
    UnknownRegister(RegisterId),
}

/// An immutable kernel/register graph.
#[derive(Debug, Clone)]
pub struct Circuit {
    pub id: CircuitId,
    pub name: String,
    pub kernels: Vec<Kernel>,
    pub registers: Vec<Register>,
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Incremental circuit construction. Kernels are declared first; inputs may
/// reference registers produced by kernels declared later.
#[derive(Debug)]
pub struct CircuitBuilder {
    circuit: Circuit,
}

impl CircuitBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        CircuitBuilder {
            circuit: Circuit {
                id: CircuitId::default(),
                name: name.into(),
                kernels: Vec::new(),
                registers: Vec::new(),
            },
        }
    }

    pub fn with_id(mut self, id: CircuitId) -> Self {
        self.circuit.id = id;
        self
    }

    /// Declare a kernel with no inputs or outputs yet.
    pub fn declare_kernel(
        &mut self,
        name: impl Into<String>,
        host: bool,
        recurrence: bool,
        span: Span,
    ) -> KernelId {
        let id = KernelId(self.circuit.kernels.len() as u32);
        self.circuit.kernels.push(Kernel {
            id,
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            host,
            recurrence,
            span,
        });
        id
    }

    /// Append an output register to `kernel`.
    pub fn add_output(
        &mut self,
        kernel: KernelId,
        name: impl Into<String>,
        field_type: FieldType,
        flags: OutputFlags,
        span: Span,
    ) -> Result<RegisterId, BuildError> {
        let id = RegisterId(self.circuit.registers.len() as u32);
        let k = self
            .circuit
            .kernels
            .get_mut(kernel.index())
            .ok_or(BuildError::UnknownKernel(kernel))?;
        k.outputs.push(id);
        self.circuit.registers.push(Register {
            id,
            name: name.into(),
            source: kernel,
            sinks: Vec::new(),
            field_type,
            probed: flags.probed,
            output: flags.output,
            recurrence: None,
            span,
        });
        Ok(id)
    }

    /// Append `register` to the inputs of `kernel` and wire the sink list.
    pub fn add_input(&mut self, kernel: KernelId, register: RegisterId) -> Result<(), BuildError> {
        let k = self
            .circuit
            .kernels
            .get_mut(kernel.index())
            .ok_or(BuildError::UnknownKernel(kernel))?;
        let r = self
            .circuit
            .registers
            .get_mut(register.index())
            .ok_or(BuildError::UnknownRegister(register))?;
        k.inputs.push(register);
        r.sinks.push(kernel);
        if k.recurrence {
            r.recurrence = Some(kernel);
        }
        Ok(())
    }

    /// Mark a register as a declared circuit output.
    pub fn mark_output(&mut self, register: RegisterId) -> Result<(), BuildError> {
        let r = self
            .circuit
            .registers
            .get_mut(register.index())
            .ok_or(BuildError::UnknownRegister(register))?;
        r.output = true;
        Ok(())
    }

    /// Mark a register as probed.
    pub fn mark_probed(&mut self, register: RegisterId) -> Result<(), BuildError> {
        let r = self
            .circuit
            .registers
            .get_mut(register.index())
            .ok_or(BuildError::UnknownRegister(register))?;
        r.probed = true;
        Ok(())
    }

    /// Declare a device kernel reading `inputs` and producing one register
    /// per entry of `outputs`, named after the kernel when only one.
    pub fn kernel(
        &mut self,
        name: &str,
        inputs: &[RegisterId],
        outputs: &[FieldType],
    ) -> Result<(KernelId, Vec<RegisterId>), BuildError> {
        self.kernel_with(name, false, false, inputs, outputs)
    }

    /// Like [`CircuitBuilder::kernel`], for a host-side kernel.
    pub fn host_kernel(
        &mut self,
        name: &str,
        inputs: &[RegisterId],
        outputs: &[FieldType],
    ) -> Result<(KernelId, Vec<RegisterId>), BuildError> {
        self.kernel_with(name, true, false, inputs, outputs)
    }

    /// Declare a recurrence kernel with no drivers yet; connect drivers with
    /// [`CircuitBuilder::add_input`] once they exist.
    pub fn recurrence_kernel(
        &mut self,
        name: &str,
        output: FieldType,
    ) -> Result<(KernelId, RegisterId), BuildError> {
        let (k, regs) = self.kernel_with(name, false, true, &[], &[output])?;
        Ok((k, regs[0]))
    }

    fn kernel_with(
        &mut self,
        name: &str,
        host: bool,
        recurrence: bool,
        inputs: &[RegisterId],
        outputs: &[FieldType],
    ) -> Result<(KernelId, Vec<RegisterId>), BuildError> {
        let span = synthetic_span();
        let k = self.declare_kernel(name, host, recurrence, span);
        for &r in inputs {
            self.add_input(k, r)?;
        }
        let mut regs = Vec::with_capacity(outputs.len());
        for (i, ty) in outputs.iter().enumerate() {
            let reg_name = if outputs.len() == 1 {
                name.to_string()
            } else {
                format!("{name}.{i}")
            };
            regs.push(self.add_output(k, reg_name, ty.clone(), OutputFlags::default(), span)?);
        }
        Ok((k, regs))
    }

    pub fn finish(self) -> Circuit {
        self.circuit
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl Circuit {
    pub fn kernel(&self, id: KernelId) -> &Kernel {
        &self.kernels[id.index()]
    }

    pub fn register(&self, id: RegisterId) -> &Register {
        &self.registers[id.index()]
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    pub fn kernel_by_name(&self, name: &str) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.name == name)
    }

    pub fn register_by_name(&self, name: &str) -> Option<&Register> {
        self.registers.iter().find(|r| r.name == name)
    }

    /// Kernels with no graph-internal inputs.
    pub fn leaves(&self) -> Vec<KernelId> {
        self.kernels
            .iter()
            .filter(|k| k.inputs.is_empty())
            .map(|k| k.id)
            .collect()
    }

    /// Kernels none of whose outputs has a sink.
    pub fn roots(&self) -> Vec<KernelId> {
        self.kernels
            .iter()
            .filter(|k| {
                k.outputs
                    .iter()
                    .all(|&r| self.register(r).sinks.is_empty())
            })
            .map(|k| k.id)
            .collect()
    }

    /// Inputs that order `kernel` within a cycle. Recurrence kernels have none.
    pub fn ordering_inputs(&self, kernel: KernelId) -> &[RegisterId] {
        let k = self.kernel(kernel);
        if k.recurrence {
            &[]
        } else {
            &k.inputs
        }
    }

    /// Sinks of `register` reached through ordering edges (one entry per
    /// consuming input position; recurrence sinks excluded).
    pub fn ordering_sinks(&self, register: RegisterId) -> impl Iterator<Item = KernelId> + '_ {
        self.register(register)
            .sinks
            .iter()
            .copied()
            .filter(move |&s| !self.kernel(s).recurrence)
    }

    /// Every kernel exactly once, each after the producers of all of its
    /// ordering inputs. Deterministic: roots of the DFS are taken in id order
    /// and inputs in argument order. Kernels on an ordering cycle are emitted
    /// when first closed, so the result is only a valid linearization for a
    /// DAG.
    pub fn postorder(&self) -> Vec<KernelId> {
        let n = self.kernels.len();
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        // (kernel, next input position)
        let mut stack: Vec<(KernelId, usize)> = Vec::new();

        for start in &self.kernels {
            if visited[start.id.index()] {
                continue;
            }
            visited[start.id.index()] = true;
            stack.push((start.id, 0));
            while let Some(top) = stack.last_mut() {
                let k = top.0;
                let inputs = self.ordering_inputs(k);
                if top.1 < inputs.len() {
                    let producer = self.register(inputs[top.1]).source;
                    top.1 += 1;
                    if !visited[producer.index()] {
                        visited[producer.index()] = true;
                        stack.push((producer, 0));
                    }
                } else {
                    order.push(k);
                    stack.pop();
                }
            }
        }
        order
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Circuit '{}' ({} kernels, {} registers)",
            self.name,
            self.kernels.len(),
            self.registers.len()
        )?;
        for k in &self.kernels {
            let mut tags = Vec::new();
            if k.host {
                tags.push("host");
            }
            if k.recurrence {
                tags.push("recurrence");
            }
            let tags = if tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", tags.join(", "))
            };
            let ins: Vec<String> = k.inputs.iter().map(|r| self.register(*r).name.clone()).collect();
            writeln!(f, "  {} {}{}({})", k.id, k.name, tags, ins.join(", "))?;
            for &r in &k.outputs {
                let reg = self.register(r);
                let mut flags = Vec::new();
                if reg.probed {
                    flags.push("probed");
                }
                if reg.output {
                    flags.push("output");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                let sinks: Vec<String> = reg.sinks.iter().map(|s| s.to_string()).collect();
                writeln!(
                    f,
                    "    -> {} {}: {}{} sinks=[{}]",
                    reg.id,
                    reg.name,
                    reg.field_type,
                    flags,
                    sinks.join(", ")
                )?;
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
