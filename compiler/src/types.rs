// types.rs — Field types and target storage layout
//
// A field type describes the value held by a virtual register: its shape,
// element kind, and whether it lives in image memory. The target layout maps
// a field type to the byte footprint a latch must provide for it.
//
// Preconditions: none.
// Postconditions: footprints are deterministic for a given layout.
// Failure modes: none (unknown element names and oversized shapes are
//                rejected by the lowering; footprints saturate).
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Element kinds ───────────────────────────────────────────────────────────

/// Scalar element of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Complex value stored as two `f32`.
    C64,
}

impl ElementKind {
    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            ElementKind::I8 | ElementKind::U8 => 1,
            ElementKind::I16 | ElementKind::U16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::F32 => 4,
            ElementKind::I64 | ElementKind::U64 | ElementKind::F64 | ElementKind::C64 => 8,
        }
    }

    pub fn from_name(name: &str) -> Option<ElementKind> {
        Some(match name {
            "i8" => ElementKind::I8,
            "i16" => ElementKind::I16,
            "i32" => ElementKind::I32,
            "i64" => ElementKind::I64,
            "u8" => ElementKind::U8,
            "u16" => ElementKind::U16,
            "u32" => ElementKind::U32,
            "u64" => ElementKind::U64,
            "f32" => ElementKind::F32,
            "f64" => ElementKind::F64,
            "c64" => ElementKind::C64,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::I8 => "i8",
            ElementKind::I16 => "i16",
            ElementKind::I32 => "i32",
            ElementKind::I64 => "i64",
            ElementKind::U8 => "u8",
            ElementKind::U16 => "u16",
            ElementKind::U32 => "u32",
            ElementKind::U64 => "u64",
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
            ElementKind::C64 => "c64",
        }
    }
}

// ── Field type ──────────────────────────────────────────────────────────────

/// Shape + element kind of a register's value. An empty shape is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldType {
    pub shape: Vec<u32>,
    pub element: ElementKind,
    /// Image-backed values occupy a physical resource distinct from buffers.
    pub image: bool,
}

impl FieldType {
    pub fn buffer(element: ElementKind, shape: &[u32]) -> Self {
        FieldType {
            shape: shape.to_vec(),
            element,
            image: false,
        }
    }

    pub fn image(element: ElementKind, shape: &[u32]) -> Self {
        FieldType {
            shape: shape.to_vec(),
            element,
            image: true,
        }
    }

    /// Number of elements (1 for a scalar), or `None` if it overflows.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |n, &d| n.checked_mul(d as usize))
    }

    /// Unpadded byte size, or `None` if it overflows.
    pub fn packed_bytes(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.element.size_bytes())
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.image {
            write!(f, "image ")?;
        }
        write!(f, "{}", self.element.name())?;
        if !self.shape.is_empty() {
            let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
            write!(f, "[{}]", dims.join(", "))?;
        }
        Ok(())
    }
}

// ── Target layout ───────────────────────────────────────────────────────────

/// Largest packed field size the front end accepts.
pub const MAX_FIELD_BYTES: usize = isize::MAX as usize;

/// Largest allocation granule.
pub const MAX_ALIGN: usize = 1 << (usize::BITS - 2);

/// Maps a field type to its physical byte footprint on the target.
/// Footprints saturate at `usize::MAX` instead of overflowing.
pub trait TargetLayout {
    fn footprint(&self, ty: &FieldType) -> usize;
}

/// Elements packed with no padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedLayout;

impl TargetLayout for PackedLayout {
    fn footprint(&self, ty: &FieldType) -> usize {
        ty.packed_bytes().unwrap_or(usize::MAX)
    }
}

/// Packed size rounded up to a power-of-two allocation granule.
#[derive(Debug, Clone, Copy)]
pub struct AlignedLayout {
    align: usize,
}

impl AlignedLayout {
    /// `align` is clamped to `[1, MAX_ALIGN]` and rounded up to a power
    /// of two.
    pub fn new(align: usize) -> Self {
        AlignedLayout {
            align: align.clamp(1, MAX_ALIGN).next_power_of_two(),
        }
    }

    pub fn align(&self) -> usize {
        self.align
    }
}

impl TargetLayout for AlignedLayout {
    fn footprint(&self, ty: &FieldType) -> usize {
        let packed = PackedLayout.footprint(ty);
        let mask = self.align - 1;
        packed
            .checked_add(mask)
            .map_or(usize::MAX, |padded| padded & !mask)
    }
}

/// Layout selected by configuration.
#[derive(Debug, Clone, Copy)]
pub enum Layout {
    Packed(PackedLayout),
    Aligned(AlignedLayout),
}

impl Layout {
    /// `align <= 1` selects the packed layout.
    pub fn from_align(align: usize) -> Self {
        if align <= 1 {
            Layout::Packed(PackedLayout)
        } else {
            Layout::Aligned(AlignedLayout::new(align))
        }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Layout::Packed(PackedLayout)
    }
}

impl TargetLayout for Layout {
    fn footprint(&self, ty: &FieldType) -> usize {
        match self {
            Layout::Packed(l) => l.footprint(ty),
            Layout::Aligned(l) => l.footprint(ty),
        }
    }
}
