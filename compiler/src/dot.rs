// dot.rs — Graphviz DOT output for kernel circuits
//
// Kernels become nodes, registers become edges from producer to each
// sink. With a plan, each edge is labelled with its latch and coloured so
// registers sharing a latch share a colour.
//
// Preconditions: `plan`, if given, was produced for `circuit`.
// Postconditions: returns a valid DOT string; output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::graph::{Circuit, Kernel, Register};
use crate::plan::LatchPlan;

const PALETTE: [&str; 8] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#17becf",
];

/// Emit the circuit as a Graphviz DOT string.
pub fn emit_dot(circuit: &Circuit, plan: Option<&LatchPlan>) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph \"{}\" {{", escape(&circuit.name)).unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();
    writeln!(buf).unwrap();

    for kernel in &circuit.kernels {
        writeln!(
            buf,
            "    {} [label=\"{}\", {}];",
            kernel.id,
            escape(&kernel.name),
            kernel_attrs(kernel)
        )
        .unwrap();
    }

    // Roots get a terminal node so their latch stays visible.
    for reg in circuit.registers.iter().filter(|r| r.is_root()) {
        writeln!(
            buf,
            "    {} [label=\"{}\", shape=plaintext];",
            reg.id,
            escape(&reg.name)
        )
        .unwrap();
    }

    writeln!(buf).unwrap();
    for reg in &circuit.registers {
        let attrs = edge_attrs(reg, plan);
        let mut seen = Vec::new();
        for &sink in &reg.sinks {
            if seen.contains(&sink) {
                continue;
            }
            seen.push(sink);
            let style = if circuit.kernel(sink).recurrence {
                ", style=dashed"
            } else {
                ""
            };
            writeln!(buf, "    {} -> {} [{attrs}{style}];", reg.source, sink).unwrap();
        }
        if reg.is_root() {
            writeln!(buf, "    {} -> {} [{attrs}];", reg.source, reg.id).unwrap();
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

fn kernel_attrs(kernel: &Kernel) -> &'static str {
    if kernel.host {
        "shape=component"
    } else if kernel.recurrence {
        "shape=doubleoctagon"
    } else {
        "shape=box, style=rounded"
    }
}

fn edge_attrs(reg: &Register, plan: Option<&LatchPlan>) -> String {
    let probe = if reg.probed { "?" } else { "" };
    match plan.and_then(|p| p.latch_of(reg.id)) {
        Some(latch) => format!(
            "label=\"{probe}{} @ {latch}\", color=\"{}\", fontcolor=\"{}\"",
            escape(&reg.name),
            PALETTE[latch.index() % PALETTE.len()],
            PALETTE[latch.index() % PALETTE.len()],
        ),
        None => format!("label=\"{probe}{}\"", escape(&reg.name)),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
