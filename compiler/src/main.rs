use clap::Parser;
use std::path::{Path, PathBuf};

use kplan::alloc::AllocatorMode;
use kplan::diag::{codes, Diagnostic};
use kplan::lower::{CatalogKind, SettingsOverrides};
use kplan::pass::PassId;
use kplan::pipeline::{compute_provenance, plan_report_json, run_pipeline, CompilationState};
use kplan::types::MAX_ALIGN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Plan,
    Json,
    Dot,
    Order,
    Circuit,
}

impl EmitStage {
    fn terminal(self) -> PassId {
        match self {
            EmitStage::Plan | EmitStage::Json | EmitStage::Dot => PassId::Verify,
            EmitStage::Order => PassId::Order,
            EmitStage::Circuit => PassId::BuildCircuit,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum AllocatorArg {
    InOrder,
    OutOfOrder,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CatalogArg {
    Exact,
    Utilization,
}

#[derive(Parser, Debug)]
#[command(
    name = "kplan",
    version,
    about = "Kernel circuit latch planner — computes storage-sharing plans for .kc circuits"
)]
struct Cli {
    /// Input .kc circuit file
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// What to emit
    #[arg(long, value_enum, default_value_t = EmitStage::Plan)]
    emit: EmitStage,

    /// Execution-ordering assumption (overrides `set allocator`)
    #[arg(long, value_enum)]
    allocator: Option<AllocatorArg>,

    /// Latch catalog policy (overrides `set catalog`)
    #[arg(long, value_enum)]
    catalog: Option<CatalogArg>,

    /// Lower bound on request/latch size ratio for the utilization catalog
    #[arg(long)]
    min_utilization: Option<f64>,

    /// Allocation granule in bytes, a power of two (1 = packed)
    #[arg(long)]
    align: Option<usize>,

    /// Report in-order candidates the legacy criterion judges differently
    #[arg(long)]
    legacy_check: bool,

    /// Print planner passes and timing
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            mode: self.allocator.map(|a| match a {
                AllocatorArg::InOrder => AllocatorMode::InOrder,
                AllocatorArg::OutOfOrder => AllocatorMode::OutOfOrder,
            }),
            catalog: self.catalog.map(|c| match c {
                CatalogArg::Exact => CatalogKind::Exact,
                CatalogArg::Utilization => CatalogKind::Utilization,
            }),
            min_utilization: self.min_utilization,
            legacy_check: self.legacy_check.then_some(true),
            align: self.align,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("kplan: source = {}", cli.source.display());
        eprintln!("kplan: emit   = {:?}", cli.emit);
    }

    if let Some(u) = cli.min_utilization {
        if !(u > 0.0 && u <= 1.0) {
            eprintln!("kplan: error: --min-utilization must be in (0, 1], got {u}");
            std::process::exit(1);
        }
    }

    if let Some(align) = cli.align {
        if !align.is_power_of_two() || align > MAX_ALIGN {
            eprintln!(
                "kplan: error: --align must be a power of two no larger than {MAX_ALIGN}, got {align}"
            );
            std::process::exit(1);
        }
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("kplan: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let parse_result = kplan::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            let (line, col) = line_col(&source, err.span().start);
            eprintln!(
                "kplan: {}:{line}:{col}: error[{}]: parse error: {}",
                cli.source.display(),
                codes::E0500,
                err
            );
        }
        std::process::exit(1);
    }
    let Some(document) = parse_result.document else {
        eprintln!("kplan: parse failed with no output");
        std::process::exit(1);
    };

    if cli.verbose {
        eprintln!("kplan: parsed {} statements", document.statements.len());
    }

    // ── Planner passes ──
    let mut state = CompilationState::new(document, cli.overrides());
    let result = run_pipeline(&mut state, cli.emit.terminal(), cli.verbose, |_, diags| {
        for d in diags {
            report(&cli.source, &source, d);
        }
    });
    if result.is_err() || state.has_error {
        std::process::exit(1);
    }
    if let Some(settings) = &state.settings {
        state.provenance = Some(compute_provenance(&source, settings));
    }

    // ── Emit ──
    let text = match render(&cli, &state) {
        Some(text) => text,
        None => {
            eprintln!("kplan: error: nothing to emit for {:?}", cli.emit);
            std::process::exit(1);
        }
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("kplan: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            if cli.verbose {
                eprintln!("kplan: wrote {}", path.display());
            }
        }
        None => print!("{text}"),
    }
}

fn render(cli: &Cli, state: &CompilationState) -> Option<String> {
    let circuit = state.circuit.as_ref()?;
    match cli.emit {
        EmitStage::Circuit => Some(circuit.to_string()),
        EmitStage::Order => {
            let order = state.order.as_ref()?;
            let mut out = String::new();
            for &k in order {
                out.push_str(&circuit.kernel(k).name);
                out.push('\n');
            }
            Some(out)
        }
        EmitStage::Plan => Some(state.allocation.as_ref()?.plan.to_string()),
        EmitStage::Dot => {
            let plan = &state.allocation.as_ref()?.plan;
            Some(kplan::dot::emit_dot(circuit, Some(plan)))
        }
        EmitStage::Json => {
            let provenance = state.provenance.as_ref()?;
            let settings = state.settings.as_ref()?;
            let allocation = state.allocation.as_ref()?;
            match plan_report_json(provenance, settings, allocation) {
                Ok(json) => Some(json),
                Err(e) => {
                    eprintln!("kplan: error: {e}");
                    None
                }
            }
        }
    }
}

fn report(path: &Path, source: &str, d: &Diagnostic) {
    if d.span.end == 0 {
        eprintln!("kplan: {d}");
    } else {
        let (line, col) = line_col(source, d.span.start);
        eprintln!("kplan: {}:{line}:{col}: {d}", path.display());
    }
    for related in &d.related_spans {
        let (line, col) = line_col(source, related.span.start);
        eprintln!("  note: {}:{line}:{col}: {}", path.display(), related.label);
    }
    for cause in &d.cause_chain {
        match cause.span {
            Some(span) => {
                let (line, col) = line_col(source, span.start);
                eprintln!("  cause: {}:{line}:{col}: {}", path.display(), cause.message);
            }
            None => eprintln!("  cause: {}", cause.message),
        }
    }
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let prefix = &source[..offset.min(source.len())];
    let line = prefix.matches('\n').count() + 1;
    let col = prefix.rfind('\n').map_or(prefix.len(), |nl| prefix.len() - nl - 1) + 1;
    (line, col)
}
