use derive_more::{Display, From};

/// Identifies the captured call stack that allocated a chunk.
///
/// The value is an opaque handle into the runtime's stack store and stays stable for the
/// lifetime of the process. The runtime resolves it back to a call stack via
/// [`SymbolStore`][crate::SymbolStore].
///
/// Zero is reserved for allocations whose origin is not known ([`SiteId::UNKNOWN`]).
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Ord, PartialEq, PartialOrd)]
#[display("site {_0}")]
pub struct SiteId(u32);

impl SiteId {
    /// The site of allocations that are not attributed to any captured call stack.
    pub const UNKNOWN: Self = Self(0);

    /// Creates a site identifier from the runtime's raw stack handle.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw stack handle, as understood by the runtime's stack store.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this identifier refers to a captured call stack.
    #[must_use]
    pub const fn is_known(self) -> bool {
        self.0 != 0
    }
}

/// State of a single heap chunk, as reported by a [`ChunkEnumerator`][crate::ChunkEnumerator]
/// while the world is stopped.
///
/// Sizes are user-visible sizes in bytes, excluding allocator headers and redzones.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ChunkRecord {
    /// The chunk is live and owned by the program.
    Allocated {
        /// Bytes requested by the program.
        size: u64,

        /// The call stack that allocated the chunk, or [`SiteId::UNKNOWN`].
        site: SiteId,
    },

    /// The chunk was freed but is held back from reuse for a while.
    Quarantined {
        /// Bytes the program had requested before freeing the chunk.
        size: u64,
    },

    /// The chunk is neither allocated nor quarantined (e.g. reserved for internal use).
    Other,
}
