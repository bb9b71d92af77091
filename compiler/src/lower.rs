// lower.rs — AST → Circuit + Settings
//
// Resolves field types, declares kernels and their output registers, then
// wires kernel inputs and circuit outputs by register name. Two passes over
// the statements, so a kernel may read a register declared further down.
// `set` statements are folded into `Settings`, then CLI overrides applied.
//
// Preconditions: `doc` is a parsed document (possibly from a file with
//                syntax errors already reported).
// Postconditions: `circuit` sink lists mirror kernel inputs; every name in
//                 the document that resolved is wired.
// Failure modes: unknown or duplicate names and bad settings produce
//                `Diagnostic` entries. Lowering continues past errors.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::alloc::{AllocOptions, AllocatorMode};
use crate::ast::*;
use crate::catalog::{CatalogPolicy, DEFAULT_MIN_UTILIZATION};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::graph::{Circuit, CircuitBuilder, OutputFlags};
use crate::id::{KernelId, RegisterId};
use crate::types::{ElementKind, FieldType, Layout, MAX_ALIGN, MAX_FIELD_BYTES};

// ── Settings ────────────────────────────────────────────────────────────────

/// Catalog family selected by `set catalog = ...` or `--catalog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    #[default]
    Exact,
    Utilization,
}

/// Planner configuration after merging defaults, `set` statements, and CLI
/// overrides (in increasing precedence).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Settings {
    pub mode: AllocatorMode,
    pub catalog: CatalogKind,
    pub min_utilization: f64,
    pub legacy_check: bool,
    /// Allocation granule in bytes; 1 means packed.
    pub align: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            mode: AllocatorMode::default(),
            catalog: CatalogKind::default(),
            min_utilization: DEFAULT_MIN_UTILIZATION,
            legacy_check: false,
            align: 1,
        }
    }
}

impl Settings {
    pub fn alloc_options(&self) -> AllocOptions {
        let catalog = match self.catalog {
            CatalogKind::Exact => CatalogPolicy::Exact,
            CatalogKind::Utilization => CatalogPolicy::Utilization {
                min_utilization: self.min_utilization,
            },
        };
        AllocOptions {
            mode: self.mode,
            catalog,
            legacy_check: self.legacy_check,
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::from_align(self.align)
    }
}

/// Command-line values that take precedence over `set` statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsOverrides {
    pub mode: Option<AllocatorMode>,
    pub catalog: Option<CatalogKind>,
    pub min_utilization: Option<f64>,
    pub legacy_check: Option<bool>,
    pub align: Option<usize>,
}

impl SettingsOverrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(catalog) = self.catalog {
            settings.catalog = catalog;
        }
        if let Some(u) = self.min_utilization {
            settings.min_utilization = u;
        }
        if let Some(check) = self.legacy_check {
            settings.legacy_check = check;
        }
        if let Some(align) = self.align {
            settings.align = align;
        }
    }
}

// ── Public API ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct LowerResult {
    pub circuit: Circuit,
    pub settings: Settings,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lower a parsed document into a circuit and its planner settings.
pub fn lower(doc: &Document, overrides: &SettingsOverrides) -> LowerResult {
    let mut ctx = LowerCtx::default();
    let mut settings = Settings::default();

    for stmt in &doc.statements {
        match &stmt.kind {
            StatementKind::Set(set) => ctx.apply_setting(set, &mut settings),
            StatementKind::Field(field) => ctx.declare_field(field),
            _ => {}
        }
    }
    overrides.apply(&mut settings);

    let name = doc
        .statements
        .iter()
        .rev()
        .find_map(|s| match &s.kind {
            StatementKind::Circuit(name) => Some(name.name.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "circuit".to_string());
    let mut builder = CircuitBuilder::new(name);

    // Pass 1: kernels and the registers they produce.
    let mut declared = Vec::new();
    for stmt in &doc.statements {
        if let StatementKind::Kernel(decl) = &stmt.kind {
            if let Some(k) = ctx.declare_kernel(&mut builder, decl, stmt.span) {
                declared.push((k, decl));
            }
        }
    }

    // Pass 2: inputs and circuit outputs.
    for (k, decl) in declared {
        for input in &decl.inputs {
            if let Some(r) = ctx.lookup_register(input) {
                if let Err(e) = builder.add_input(k, r) {
                    ctx.error(None, input.span, e.to_string());
                }
            }
        }
    }
    for stmt in &doc.statements {
        if let StatementKind::Output(names) = &stmt.kind {
            for name in names {
                if let Some(r) = ctx.lookup_register(name) {
                    if let Err(e) = builder.mark_output(r) {
                        ctx.error(None, name.span, e.to_string());
                    }
                }
            }
        }
    }

    ctx.report_unused_fields();

    LowerResult {
        circuit: builder.finish(),
        settings,
        diagnostics: ctx.diagnostics,
    }
}

// ── Lowering context ────────────────────────────────────────────────────────

struct FieldEntry {
    ty: Option<FieldType>,
    span: Span,
    used: bool,
}

#[derive(Default)]
struct LowerCtx {
    fields: HashMap<String, FieldEntry>,
    kernels: HashMap<String, Span>,
    registers: HashMap<String, (RegisterId, Span)>,
    /// Outputs whose declaration failed; references to them are not
    /// reported again.
    poisoned: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl LowerCtx {
    fn error(&mut self, code: Option<DiagCode>, span: Span, message: String) -> &mut Diagnostic {
        let mut d = Diagnostic::new(DiagLevel::Error, span, message);
        d.code = code;
        self.diagnostics.push(d);
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    fn warning(&mut self, code: DiagCode, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Warning, span, message).with_code(code));
    }

    // ── set ──

    fn apply_setting(&mut self, set: &SetStmt, settings: &mut Settings) {
        let key = set.name.name.as_str();
        let span = set.value.span();
        match key {
            "allocator" => match ident_value(&set.value) {
                Some("in_order") => settings.mode = AllocatorMode::InOrder,
                Some("out_of_order") => settings.mode = AllocatorMode::OutOfOrder,
                _ => self.bad_setting(key, span, "in_order | out_of_order"),
            },
            "catalog" => match ident_value(&set.value) {
                Some("exact") => settings.catalog = CatalogKind::Exact,
                Some("utilization") => settings.catalog = CatalogKind::Utilization,
                _ => self.bad_setting(key, span, "exact | utilization"),
            },
            "min_utilization" => match set.value {
                SetValue::Number(n, _) if n > 0.0 && n <= 1.0 => settings.min_utilization = n,
                _ => self.bad_setting(key, span, "a number in (0, 1]"),
            },
            "legacy_check" => match set.value {
                SetValue::Bool(b, _) => settings.legacy_check = b,
                _ => self.bad_setting(key, span, "true | false"),
            },
            "align" => match set.value {
                SetValue::Number(n, _)
                    if is_positive_int(n)
                        && n <= MAX_ALIGN as f64
                        && (n as usize).is_power_of_two() =>
                {
                    settings.align = n as usize;
                }
                _ => self.bad_setting(key, span, "a power of two no larger than 2^(usize::BITS - 2)"),
            },
            _ => {
                self.error(
                    Some(codes::E0106),
                    set.name.span,
                    format!("unknown setting '{key}'"),
                )
                .hint = Some(
                    "known settings: allocator, catalog, min_utilization, legacy_check, align"
                        .to_string(),
                );
            }
        }
    }

    fn bad_setting(&mut self, key: &str, span: Span, expected: &str) {
        self.error(
            Some(codes::E0105),
            span,
            format!("invalid value for setting '{key}'"),
        )
        .hint = Some(format!("expected {expected}"));
    }

    // ── field ──

    fn declare_field(&mut self, field: &FieldDecl) {
        let name = &field.name.name;
        if let Some(prev) = self.fields.get(name) {
            let prev_span = prev.span;
            let d = self.error(
                Some(codes::E0108),
                field.name.span,
                format!("field type '{name}' defined twice"),
            );
            d.related_spans.push(crate::diag::RelatedSpan {
                span: prev_span,
                label: "first definition here".to_string(),
            });
            return;
        }
        let ty = self.resolve_type(&field.ty);
        self.fields.insert(
            name.clone(),
            FieldEntry {
                ty,
                span: field.name.span,
                used: false,
            },
        );
    }

    fn resolve_type(&mut self, ty: &TypeExpr) -> Option<FieldType> {
        let element = match ElementKind::from_name(&ty.element.name) {
            Some(e) => e,
            None => {
                self.error(
                    Some(codes::E0101),
                    ty.element.span,
                    format!("unknown element kind '{}'", ty.element.name),
                )
                .hint = Some("expected one of i8..i64, u8..u64, f32, f64, c64".to_string());
                return None;
            }
        };
        let mut shape = Vec::with_capacity(ty.dims.len());
        for &(d, span) in &ty.dims {
            if is_positive_int(d) && d <= u32::MAX as f64 {
                shape.push(d as u32);
            } else {
                self.error(
                    Some(codes::E0107),
                    span,
                    format!("invalid dimension {d}: expected a positive integer"),
                );
                return None;
            }
        }
        let field_type = if ty.image {
            FieldType::image(element, &shape)
        } else {
            FieldType::buffer(element, &shape)
        };
        match field_type.packed_bytes() {
            Some(bytes) if bytes <= MAX_FIELD_BYTES => Some(field_type),
            _ => {
                self.error(
                    Some(codes::E0107),
                    ty.span,
                    format!("field type {field_type} is too large"),
                )
                .hint = Some(format!("the packed size must not exceed {MAX_FIELD_BYTES} bytes"));
                None
            }
        }
    }

    fn report_unused_fields(&mut self) {
        let mut unused: Vec<(String, Span)> = self
            .fields
            .iter()
            .filter(|(_, f)| !f.used)
            .map(|(name, f)| (name.clone(), f.span))
            .collect();
        unused.sort_by_key(|(_, span)| span.start);
        for (name, span) in unused {
            self.warning(
                codes::W0100,
                span,
                format!("field type '{name}' is never used"),
            );
        }
    }

    // ── kernel ──

    fn declare_kernel(
        &mut self,
        builder: &mut CircuitBuilder,
        decl: &KernelDecl,
        span: Span,
    ) -> Option<KernelId> {
        let name = &decl.name.name;
        if let Some(&first) = self.kernels.get(name) {
            let d = self.error(
                Some(codes::E0104),
                decl.name.span,
                format!("kernel '{name}' defined twice"),
            );
            d.related_spans.push(crate::diag::RelatedSpan {
                span: first,
                label: "first definition here".to_string(),
            });
            return None;
        }
        self.kernels.insert(name.clone(), decl.name.span);

        let k = builder.declare_kernel(
            name.clone(),
            decl.kind == KernelKind::Host,
            decl.kind == KernelKind::Recurrence,
            span,
        );
        for out in &decl.outputs {
            self.declare_output(builder, k, out);
        }
        Some(k)
    }

    fn declare_output(&mut self, builder: &mut CircuitBuilder, k: KernelId, out: &OutputDecl) {
        let name = &out.name.name;
        if let Some(&(_, first)) = self.registers.get(name) {
            let d = self.error(
                Some(codes::E0102),
                out.name.span,
                format!("register '{name}' defined twice"),
            );
            d.related_spans.push(crate::diag::RelatedSpan {
                span: first,
                label: "first definition here".to_string(),
            });
            return;
        }
        let ty = match self.fields.get_mut(&out.ty.name) {
            Some(entry) => {
                entry.used = true;
                entry.ty.clone()
            }
            None => {
                self.error(
                    Some(codes::E0100),
                    out.ty.span,
                    format!("unknown field type '{}'", out.ty.name),
                )
                .hint = Some(format!("declare it with `field {} = ...`", out.ty.name));
                None
            }
        };
        // A field whose own declaration failed was already reported.
        let Some(ty) = ty else {
            self.poisoned.insert(name.clone());
            return;
        };
        let flags = OutputFlags {
            probed: out.probed,
            output: false,
        };
        match builder.add_output(k, name.clone(), ty, flags, out.span) {
            Ok(r) => {
                self.registers.insert(name.clone(), (r, out.name.span));
            }
            Err(e) => {
                self.error(None, out.span, e.to_string());
            }
        }
    }

    fn lookup_register(&mut self, name: &Ident) -> Option<RegisterId> {
        if let Some(&(r, _)) = self.registers.get(&name.name) {
            return Some(r);
        }
        if !self.poisoned.contains(&name.name) {
            self.error(
                Some(codes::E0103),
                name.span,
                format!("unknown register '{}'", name.name),
            )
            .hint = Some("declare it as an output of some kernel".to_string());
        }
        None
    }
}

fn ident_value(value: &SetValue) -> Option<&str> {
    match value {
        SetValue::Ident(id) => Some(id.name.as_str()),
        _ => None,
    }
}

fn is_positive_int(n: f64) -> bool {
    n >= 1.0 && n.fract() == 0.0
}

// ── Tests ───────────────────────────────────────────────────────────────────
