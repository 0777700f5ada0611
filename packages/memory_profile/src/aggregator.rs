//! Per-site accumulation of chunk records observed during a snapshot.

use foldhash::{HashMap, HashMapExt};

use crate::{ChunkRecord, HeapProfile, SiteId};

/// Live heap usage attributed to one allocation site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocationSite {
    id: SiteId,
    total_size: u64,
    count: u64,
}

impl AllocationSite {
    pub(crate) const fn new(id: SiteId, total_size: u64, count: u64) -> Self {
        Self {
            id,
            total_size,
            count,
        }
    }

    /// The call stack that allocated the chunks.
    #[must_use]
    pub const fn id(&self) -> SiteId {
        self.id
    }

    /// Sum of the user-visible sizes of all live chunks allocated from this site.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of live chunks allocated from this site.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    fn add(&mut self, size: u64) {
        self.total_size = self
            .total_size
            .checked_add(size)
            .expect("site total size overflows u64 - this indicates an unrealistic scenario");
        self.count = self
            .count
            .checked_add(1)
            .expect("site chunk count overflows u64 - this indicates an unrealistic scenario");
    }
}

/// Whole-heap counters at the moment of the snapshot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SnapshotTotals {
    pub(crate) allocated_bytes: u64,
    pub(crate) allocated_count: u64,
    pub(crate) quarantined_bytes: u64,
    pub(crate) quarantined_count: u64,
    pub(crate) other_count: u64,
}

impl SnapshotTotals {
    /// Bytes in live chunks, whether attributed to a site or not.
    #[must_use]
    pub const fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Number of live chunks, whether attributed to a site or not.
    #[must_use]
    pub const fn allocated_count(&self) -> u64 {
        self.allocated_count
    }

    /// Bytes in freed chunks that are held back from reuse.
    #[must_use]
    pub const fn quarantined_bytes(&self) -> u64 {
        self.quarantined_bytes
    }

    /// Number of freed chunks that are held back from reuse.
    #[must_use]
    pub const fn quarantined_count(&self) -> u64 {
        self.quarantined_count
    }

    /// Number of chunks that are neither allocated nor quarantined.
    #[must_use]
    pub const fn other_count(&self) -> u64 {
        self.other_count
    }

    /// Number of chunks observed in the snapshot, in any state.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.allocated_count
            .checked_add(self.quarantined_count)
            .and_then(|sum| sum.checked_add(self.other_count))
            .expect("total chunk count overflows u64 - this indicates an unrealistic scenario")
    }
}

/// Accumulates chunk records into whole-heap totals and per-site statistics.
///
/// An aggregator is built fresh for every snapshot, fed every chunk of the heap once and then
/// turned into a [`HeapProfile`] via [`finalize()`][Self::finalize]. The order in which chunks
/// are observed does not affect the result.
///
/// Allocated chunks without a known site ([`SiteId::UNKNOWN`]) count towards the totals but do
/// not produce a site entry.
///
/// # Example
///
/// ```
/// use memory_profile::{ChunkRecord, SiteAggregator, SiteId};
///
/// let mut aggregator = SiteAggregator::new();
/// aggregator.observe(ChunkRecord::Allocated {
///     size: 100,
///     site: SiteId::new(1),
/// });
/// aggregator.observe(ChunkRecord::Quarantined { size: 20 });
///
/// let profile = aggregator.finalize();
/// assert_eq!(profile.totals().allocated_bytes(), 100);
/// assert_eq!(profile.totals().total_count(), 2);
/// assert_eq!(profile.sites().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SiteAggregator {
    totals: SnapshotTotals,

    // In order of first observation.
    sites: Vec<AllocationSite>,

    // Index into `sites` for each site seen so far.
    index_by_id: HashMap<SiteId, usize>,
}

impl SiteAggregator {
    /// Creates an aggregator that has not observed any chunks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            totals: SnapshotTotals::default(),
            sites: Vec::new(),
            index_by_id: HashMap::new(),
        }
    }

    /// Adds one chunk to the snapshot.
    pub fn observe(&mut self, record: ChunkRecord) {
        match record {
            ChunkRecord::Allocated { size, site } => {
                self.totals.allocated_bytes = checked_sum(self.totals.allocated_bytes, size);
                self.totals.allocated_count = checked_sum(self.totals.allocated_count, 1);

                if site.is_known() {
                    self.add_to_site(site, size);
                }
            }
            ChunkRecord::Quarantined { size } => {
                self.totals.quarantined_bytes = checked_sum(self.totals.quarantined_bytes, size);
                self.totals.quarantined_count = checked_sum(self.totals.quarantined_count, 1);
            }
            ChunkRecord::Other => {
                self.totals.other_count = checked_sum(self.totals.other_count, 1);
            }
        }
    }

    /// Number of distinct sites observed so far.
    #[must_use]
    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    /// Ends the snapshot, exposing the accumulated state.
    ///
    /// Sites are listed in the order they were first observed. Ranking is left to the report.
    #[must_use]
    pub fn finalize(self) -> HeapProfile {
        HeapProfile::new(self.totals, self.sites)
    }

    fn add_to_site(&mut self, id: SiteId, size: u64) {
        if let Some(&index) = self.index_by_id.get(&id) {
            self.sites
                .get_mut(index)
                .expect("site index always points into the site list")
                .add(size);
        } else {
            self.index_by_id.insert(id, self.sites.len());
            self.sites.push(AllocationSite::new(id, size, 1));
        }
    }
}

fn checked_sum(current: u64, delta: u64) -> u64 {
    current
        .checked_add(delta)
        .expect("heap snapshot counter overflows u64 - this indicates an unrealistic scenario")
}
