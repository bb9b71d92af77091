// catalog.rs — Indexed latch collections with candidate selection policies
//
// The catalog owns every latch created during one allocation pass. Open
// latches are indexed for candidate lookup; sealed latches leave the index
// and are retained only for enumeration. Image-backed requests are always
// answered from a disjoint sub-catalog keyed by exact field type, so image
// and buffer memory can never share a latch.
//
// Preconditions: latches are bound before they are added.
// Postconditions: `get` returns open latches only, best candidate first.
// Failure modes: none.
// Side effects: none.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use serde::Serialize;

use crate::id::LatchId;
use crate::latch::{Latch, OpenLatch, ResourceClass, StorageRequest};
use crate::types::FieldType;

/// Default floor for the utilization policy.
pub const DEFAULT_MIN_UTILIZATION: f64 = 0.25;

// ── Policy ──────────────────────────────────────────────────────────────────

/// Candidate selection policy for buffer latches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CatalogPolicy {
    /// Reuse only latches whose footprint equals the request exactly.
    Exact,
    /// Reuse latches within a utilization band, least waste first.
    Utilization { min_utilization: f64 },
}

impl Default for CatalogPolicy {
    fn default() -> Self {
        CatalogPolicy::Exact
    }
}

impl CatalogPolicy {
    pub fn utilization() -> Self {
        CatalogPolicy::Utilization {
            min_utilization: DEFAULT_MIN_UTILIZATION,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CatalogPolicy::Exact => "exact",
            CatalogPolicy::Utilization { .. } => "utilization",
        }
    }

    /// Build an empty catalog implementing this policy.
    pub fn build(self) -> Box<dyn LatchCatalog> {
        match self {
            CatalogPolicy::Exact => Box::new(ExactCatalog::default()),
            CatalogPolicy::Utilization { min_utilization } => {
                Box::new(UtilizationCatalog::new(min_utilization))
            }
        }
    }
}

// ── Catalog interface ───────────────────────────────────────────────────────

/// Latch storage with policy-specific candidate ordering.
pub trait LatchCatalog {
    /// Open latches that could hold `request`, best first. Not filtered by
    /// liveness.
    fn get(&self, request: &StorageRequest) -> Vec<&OpenLatch>;

    /// Insert a latch (freshly created or just rebound).
    fn add_latch(&mut self, latch: Latch);

    /// Remove an open latch so it can be rebound.
    fn take(&mut self, id: LatchId) -> Option<OpenLatch>;

    /// Every latch, in id order.
    fn values(&self) -> Vec<&Latch>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Shared storage ──────────────────────────────────────────────────────────

/// Open latches grouped by key, id-ordered within a group.
#[derive(Debug)]
struct Buckets<K: Ord + Clone> {
    groups: BTreeMap<K, BTreeMap<LatchId, Latch>>,
    locator: HashMap<LatchId, K>,
}

impl<K: Ord + Clone> Default for Buckets<K> {
    fn default() -> Self {
        Buckets {
            groups: BTreeMap::new(),
            locator: HashMap::new(),
        }
    }
}

impl<K: Ord + Clone> Buckets<K> {
    fn insert(&mut self, key: K, latch: Latch) {
        self.locator.insert(latch.id(), key.clone());
        self.groups.entry(key).or_default().insert(latch.id(), latch);
    }

    fn remove(&mut self, id: LatchId) -> Option<Latch> {
        let key = self.locator.remove(&id)?;
        let group = self.groups.get_mut(&key)?;
        let latch = group.remove(&id);
        if group.is_empty() {
            self.groups.remove(&key);
        }
        latch
    }

    fn group(&self, key: &K) -> impl Iterator<Item = &OpenLatch> {
        self.groups
            .get(key)
            .into_iter()
            .flat_map(|g| g.values().filter_map(Latch::as_open))
    }

    fn latches(&self) -> impl Iterator<Item = &Latch> {
        self.groups.values().flat_map(|g| g.values())
    }

    fn len(&self) -> usize {
        self.locator.len()
    }
}

/// Storage common to both policies: buffer latches keyed by peak footprint,
/// image latches keyed by exact field type, and sealed latches.
#[derive(Debug, Default)]
struct LatchStore {
    buffers: Buckets<usize>,
    images: Buckets<FieldType>,
    sealed: Vec<Latch>,
}

impl LatchStore {
    fn add(&mut self, latch: Latch) {
        if latch.is_sealed() {
            self.sealed.push(latch);
            return;
        }
        match latch.resource().clone() {
            ResourceClass::Buffer => {
                let peak = latch.peak_bytes();
                self.buffers.insert(peak, latch);
            }
            ResourceClass::Image { field_type } => self.images.insert(field_type, latch),
        }
    }

    fn take(&mut self, id: LatchId) -> Option<OpenLatch> {
        let latch = self
            .buffers
            .remove(id)
            .or_else(|| self.images.remove(id))?;
        match latch {
            Latch::Open(open) => Some(open),
            Latch::Sealed(_) => None,
        }
    }

    fn image_candidates(&self, field_type: &FieldType) -> Vec<&OpenLatch> {
        self.images.group(field_type).collect()
    }

    fn values(&self) -> Vec<&Latch> {
        let mut all: Vec<&Latch> = self
            .buffers
            .latches()
            .chain(self.images.latches())
            .chain(self.sealed.iter())
            .collect();
        all.sort_by_key(|l| l.id());
        all
    }

    fn len(&self) -> usize {
        self.buffers.len() + self.images.len() + self.sealed.len()
    }
}

// ── Exact policy ────────────────────────────────────────────────────────────

/// Buffer latches match only requests of identical footprint.
#[derive(Debug, Default)]
pub struct ExactCatalog {
    store: LatchStore,
}

impl LatchCatalog for ExactCatalog {
    fn get(&self, request: &StorageRequest) -> Vec<&OpenLatch> {
        match &request.resource {
            ResourceClass::Buffer => self.store.buffers.group(&request.bytes).collect(),
            ResourceClass::Image { field_type } => self.store.image_candidates(field_type),
        }
    }

    fn add_latch(&mut self, latch: Latch) {
        self.store.add(latch);
    }

    fn take(&mut self, id: LatchId) -> Option<OpenLatch> {
        self.store.take(id)
    }

    fn values(&self) -> Vec<&Latch> {
        self.store.values()
    }

    fn len(&self) -> usize {
        self.store.len()
    }
}

// ── Utilization policy ──────────────────────────────────────────────────────

/// Buffer latches match requests within a utilization band.
///
/// For a request of `S` bytes, a latch with peak `M` is feasible when
/// `S >= u*M` and `M >= u*S`. Feasible latches that already hold `S` come
/// first, smallest `M` first; latches that would have to grow follow,
/// largest `M` first.
#[derive(Debug)]
pub struct UtilizationCatalog {
    store: LatchStore,
    min_utilization: f64,
}

impl UtilizationCatalog {
    /// `min_utilization` must lie in `(0, 1]`, the range the front end
    /// accepts. Values above 1 clamp to 1; zero, negative and NaN values
    /// fall back to [`DEFAULT_MIN_UTILIZATION`].
    pub fn new(min_utilization: f64) -> Self {
        let u = if min_utilization > 0.0 {
            min_utilization.min(1.0)
        } else {
            log::warn!(
                "min_utilization {min_utilization} is outside (0, 1]; using {DEFAULT_MIN_UTILIZATION}"
            );
            DEFAULT_MIN_UTILIZATION
        };
        UtilizationCatalog {
            store: LatchStore::default(),
            min_utilization: u,
        }
    }

    pub fn min_utilization(&self) -> f64 {
        self.min_utilization
    }

    /// Peak footprints `M` feasible for a request of `bytes`.
    fn feasible_peaks(&self, bytes: usize) -> RangeInclusive<usize> {
        let s = bytes as f64;
        let u = self.min_utilization;
        let lo = (u * s).ceil() as usize;
        let hi = (s / u).floor().min(usize::MAX as f64) as usize;
        lo..=hi
    }
}

impl Default for UtilizationCatalog {
    fn default() -> Self {
        UtilizationCatalog::new(DEFAULT_MIN_UTILIZATION)
    }
}

impl LatchCatalog for UtilizationCatalog {
    fn get(&self, request: &StorageRequest) -> Vec<&OpenLatch> {
        let field_type = match &request.resource {
            ResourceClass::Buffer => None,
            ResourceClass::Image { field_type } => Some(field_type),
        };
        if let Some(ty) = field_type {
            return self.store.image_candidates(ty);
        }

        let s = request.bytes;
        let feasible = self.feasible_peaks(s);
        let (lo, hi) = (*feasible.start(), *feasible.end());
        let mut out = Vec::new();
        if hi >= s {
            // Fits without growing: least waste first.
            for (_, group) in self.store.buffers.groups.range(s.max(lo)..=hi) {
                out.extend(group.values().filter_map(Latch::as_open));
            }
        }
        if lo < s {
            // Must grow: smallest relative growth first.
            for (_, group) in self.store.buffers.groups.range(lo..s).rev() {
                out.extend(group.values().filter_map(Latch::as_open));
            }
        }
        out
    }

    fn add_latch(&mut self, latch: Latch) {
        self.store.add(latch);
    }

    fn take(&mut self, id: LatchId) -> Option<OpenLatch> {
        self.store.take(id)
    }

    fn values(&self) -> Vec<&Latch> {
        self.store.values()
    }

    fn len(&self) -> usize {
        self.store.len()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
