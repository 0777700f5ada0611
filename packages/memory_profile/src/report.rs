//! Ranking and rendering of heap snapshots.

use std::{fmt, io};

use tracing::debug;

use crate::{AllocationSite, ProfileOptions, Result, SiteId, SnapshotTotals, SymbolStore};

/// The aggregated contents of one heap snapshot.
///
/// Obtained from [`SiteAggregator::finalize()`][crate::SiteAggregator::finalize] or
/// [`MemoryProfiler::capture()`][crate::MemoryProfiler::capture]. A profile is a plain value:
/// it holds no locks and refers to no runtime state.
#[derive(Clone, Debug)]
pub struct HeapProfile {
    totals: SnapshotTotals,

    // In order of first observation.
    sites: Box<[AllocationSite]>,
}

/// What a call to [`HeapProfile::write_report()`] produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum RenderOutcome {
    /// The header and this many ranked sites were written.
    Rendered {
        /// Number of sites listed after the header.
        sites_shown: usize,
    },

    /// The snapshot contained no allocated bytes, so there was nothing to rank.
    ///
    /// A single line saying so was written instead of the report.
    Empty,
}

impl HeapProfile {
    pub(crate) fn new(totals: SnapshotTotals, sites: Vec<AllocationSite>) -> Self {
        Self {
            totals,
            sites: sites.into_boxed_slice(),
        }
    }

    /// Whole-heap counters of the snapshot.
    #[must_use]
    pub fn totals(&self) -> &SnapshotTotals {
        &self.totals
    }

    /// Every attributed allocation site, in the order the sites were first observed.
    #[must_use]
    pub fn sites(&self) -> &[AllocationSite] {
        &self.sites
    }

    /// Whether the snapshot holds no allocated bytes and therefore nothing to rank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.totals.allocated_bytes() == 0
    }

    /// Every attributed allocation site, largest first.
    ///
    /// Sites with the same total size are ordered by ascending [`SiteId`].
    #[must_use]
    pub fn ranked_sites(&self) -> Vec<AllocationSite> {
        let mut ranked = self.sites.to_vec();
        ranked.sort_unstable_by(|a, b| {
            b.total_size()
                .cmp(&a.total_size())
                .then_with(|| a.id().cmp(&b.id()))
        });
        ranked
    }

    /// Writes the human-readable report to `out`.
    ///
    /// The report starts with a header line summarizing the whole heap, followed by the ranked
    /// sites, each with its call stack as rendered by `symbols`. Listing stops after
    /// [`max_contexts`][ProfileOptions::max_contexts] sites, or right after the site that takes
    /// the listed share of allocated bytes above [`top_percent`][ProfileOptions::top_percent],
    /// whichever comes first.
    ///
    /// Lines are written as they are produced. If the snapshot holds no allocated bytes, a single
    /// line saying so is written and [`RenderOutcome::Empty`] is returned.
    ///
    /// # Example
    ///
    /// ```
    /// use memory_profile::fake::FakeHeap;
    /// use memory_profile::{ChunkRecord, ProfileOptions, RenderOutcome, SiteAggregator, SiteId};
    ///
    /// let symbols = FakeHeap::new().stack(1, "    #0 main").build();
    ///
    /// let mut aggregator = SiteAggregator::new();
    /// aggregator.observe(ChunkRecord::Allocated {
    ///     size: 64,
    ///     site: SiteId::new(1),
    /// });
    ///
    /// let mut out = Vec::new();
    /// let outcome = aggregator
    ///     .finalize()
    ///     .write_report(&ProfileOptions::default(), &symbols, &mut out)
    ///     .unwrap();
    ///
    /// assert_eq!(outcome, RenderOutcome::Rendered { sites_shown: 1 });
    /// assert!(String::from_utf8(out).unwrap().contains("64 byte(s) (100%) in 1 allocation(s)"));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::Output`][crate::Error::Output] if writing to `out` fails.
    pub fn write_report<S, W>(
        &self,
        options: &ProfileOptions,
        symbols: &S,
        out: &mut W,
    ) -> Result<RenderOutcome>
    where
        S: SymbolStore + ?Sized,
        W: io::Write + ?Sized,
    {
        let totals = &self.totals;
        let allocated_bytes = totals.allocated_bytes();

        if allocated_bytes == 0 {
            writeln!(
                out,
                "Live Heap Allocations: 0 bytes in {} chunks; nothing to report ({} chunks observed)",
                totals.allocated_count(),
                totals.total_count()
            )?;

            debug!(
                total_chunks = totals.total_count(),
                "heap snapshot holds no allocated bytes"
            );
            return Ok(RenderOutcome::Empty);
        }

        writeln!(
            out,
            "Live Heap Allocations: {} bytes in {} chunks; quarantined: {} bytes in {} chunks; \
             {} other chunks; total chunks: {}; showing top {}% ({})",
            allocated_bytes,
            totals.allocated_count(),
            totals.quarantined_bytes(),
            totals.quarantined_count(),
            totals.other_count(),
            totals.total_count(),
            options.top_percent(),
            ContextLimit(options.max_contexts())
        )?;

        let mut total_shown: u64 = 0;
        let mut sites_shown: usize = 0;

        for site in self.ranked_sites().iter().take(options.max_contexts()) {
            writeln!(
                out,
                "{} byte(s) ({}%) in {} allocation(s)",
                site.total_size(),
                truncated_percent(site.total_size(), allocated_bytes),
                site.count()
            )?;
            write_stack(out, site.id(), symbols)?;

            sites_shown = sites_shown
                .checked_add(1)
                .expect("cannot show more sites than fit in memory");
            total_shown = total_shown
                .checked_add(site.total_size())
                .expect("shown bytes never exceed allocated bytes, which fit in u64");

            if truncated_percent(total_shown, allocated_bytes) > u128::from(options.top_percent()) {
                break;
            }
        }

        debug!(
            sites_shown,
            distinct_sites = self.sites.len(),
            "memory profile report written"
        );

        Ok(RenderOutcome::Rendered { sites_shown })
    }
}

fn write_stack<S, W>(out: &mut W, site: SiteId, symbols: &S) -> io::Result<()>
where
    S: SymbolStore + ?Sized,
    W: io::Write + ?Sized,
{
    let stack = symbols.render_stack(site);
    out.write_all(stack.as_bytes())?;

    if !stack.is_empty() && !stack.ends_with('\n') {
        out.write_all(b"\n")?;
    }

    Ok(())
}

/// The header's description of how many sites may be listed.
struct ContextLimit(usize);

impl fmt::Display for ContextLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            usize::MAX => write!(f, "all unique contexts"),
            limit => write!(f, "at most {limit} unique contexts"),
        }
    }
}

/// `part * 100 / whole`, truncated towards zero.
#[expect(clippy::integer_division, reason = "percentages are truncated by definition")]
#[expect(
    clippy::arithmetic_side_effects,
    reason = "u64 * 100 always fits in u128 and callers guarantee a non-zero divisor"
)]
fn truncated_percent(part: u64, whole: u64) -> u128 {
    debug_assert!(whole != 0, "percentage of zero bytes is undefined");
    u128::from(part) * 100 / u128::from(whole)
}
