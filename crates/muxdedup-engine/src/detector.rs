//! Pairwise duplicate detection over the sorted mux snapshot.
//!
//! Every unordered pair is compared, so the cost is quadratic in the number of
//! muxes. That is fine for the few hundred muxes a typical server carries; it is
//! the first thing to revisit for much larger installations.

use muxdedup_core::Mux;

/// Two muxes on the same orbital position and polarisation closer than this are duplicates.
pub const FREQUENCY_TOLERANCE_KHZ: u32 = 1000;

/// Sort ascending by `(orbital, frequency)` so reports come out in a stable order.
pub fn sort_muxes(muxes: &mut [Mux]) {
    muxes.sort_by(|a, b| {
        (a.orbital.as_str(), a.frequency).cmp(&(b.orbital.as_str(), b.frequency))
    });
}

pub fn is_duplicate(a: &Mux, b: &Mux) -> bool {
    a.orbital == b.orbital
        && a.polarisation == b.polarisation
        && a.frequency.abs_diff(b.frequency) < FREQUENCY_TOLERANCE_KHZ
}

#[derive(Debug, Clone)]
struct DupKey {
    orbital: String,
    polarisation: String,
    frequency: u32,
}

impl DupKey {
    fn matches(&self, other: &DupKey) -> bool {
        self.orbital == other.orbital
            && self.polarisation == other.polarisation
            && self.frequency.abs_diff(other.frequency) < FREQUENCY_TOLERANCE_KHZ
    }
}

/// Lazy nested scan yielding `(i, j)` index pairs with `i < j`, outer index
/// ascending then inner index ascending.
///
/// The keys are captured when the scan is created, so later in-memory edits to
/// the muxes do not change which pairs are reported.
#[derive(Debug, Clone)]
pub struct DuplicatePairs {
    keys: Vec<DupKey>,
    outer: usize,
    inner: usize,
    scanned: usize,
}

impl DuplicatePairs {
    pub fn new(muxes: &[Mux]) -> Self {
        Self {
            keys: muxes
                .iter()
                .map(|m| DupKey {
                    orbital: m.orbital.clone(),
                    polarisation: m.polarisation.clone(),
                    frequency: m.frequency,
                })
                .collect(),
            outer: 0,
            inner: 1,
            scanned: 0,
        }
    }

    /// Pairs compared so far, flagged or not.
    pub fn scanned(&self) -> usize {
        self.scanned
    }
}

impl Iterator for DuplicatePairs {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.keys.len();
        while self.outer < n {
            while self.inner < n {
                let (i, j) = (self.outer, self.inner);
                self.inner += 1;
                self.scanned += 1;
                if self.keys[i].matches(&self.keys[j]) {
                    return Some((i, j));
                }
            }
            self.outer += 1;
            self.inner = self.outer + 1;
        }
        None
    }
}

pub fn duplicate_pairs(muxes: &[Mux]) -> DuplicatePairs {
    DuplicatePairs::new(muxes)
}
