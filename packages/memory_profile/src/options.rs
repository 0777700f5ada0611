/// Selection thresholds and verbosity of a memory profile report.
///
/// Use [`ProfileOptions::builder()`] to customize, or [`ProfileOptions::default()`] to list every
/// site with no verbose output.
///
/// # Example
///
/// ```
/// use memory_profile::ProfileOptions;
///
/// // Show the sites responsible for the first 90% of live bytes, but no more than 20 of them.
/// let options = ProfileOptions::builder()
///     .top_percent(90)
///     .max_contexts(20)
///     .build();
///
/// assert_eq!(options.top_percent(), 90);
/// assert_eq!(options.max_contexts(), 20);
/// assert!(!options.verbose());
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProfileOptions {
    top_percent: u64,
    max_contexts: usize,
    verbose: bool,
}

impl ProfileOptions {
    /// Starts building a customized set of options.
    #[must_use]
    pub fn builder() -> ProfileOptionsBuilder {
        ProfileOptionsBuilder::new()
    }

    /// Once the listed sites account for more than this percentage of live allocated bytes,
    /// no further sites are listed.
    #[must_use]
    pub const fn top_percent(&self) -> u64 {
        self.top_percent
    }

    /// Upper limit on the number of distinct sites listed.
    #[must_use]
    pub const fn max_contexts(&self) -> usize {
        self.max_contexts
    }

    /// Whether the runtime's accumulated allocator statistics are appended to the report.
    #[must_use]
    pub const fn verbose(&self) -> bool {
        self.verbose
    }
}

impl Default for ProfileOptions {
    fn default() -> Self {
        ProfileOptionsBuilder::new().build()
    }
}

/// Creates instances of [`ProfileOptions`].
///
/// All properties are optional. Use [`ProfileOptions::builder()`] to create a new instance.
#[derive(Clone, Copy, Debug)]
pub struct ProfileOptionsBuilder {
    top_percent: u64,
    max_contexts: usize,
    verbose: bool,
}

impl ProfileOptionsBuilder {
    const fn new() -> Self {
        Self {
            top_percent: 100,
            max_contexts: usize::MAX,
            verbose: false,
        }
    }

    /// Stops listing sites once the cumulative share of live bytes exceeds this percentage.
    ///
    /// The site that crosses the threshold is still listed. Defaults to 100.
    #[must_use]
    pub const fn top_percent(self, top_percent: u64) -> Self {
        Self {
            top_percent,
            ..self
        }
    }

    /// Lists at most this many sites, whatever share of live bytes they account for.
    ///
    /// Defaults to no limit, represented as `usize::MAX`. The report header then describes the
    /// listing as "all unique contexts" instead of giving a number.
    #[must_use]
    pub const fn max_contexts(self, max_contexts: usize) -> Self {
        Self {
            max_contexts,
            ..self
        }
    }

    /// Appends the runtime's accumulated allocator statistics after the listed sites.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub const fn verbose(self, verbose: bool) -> Self {
        Self { verbose, ..self }
    }

    /// Finishes building the options.
    #[must_use]
    pub const fn build(self) -> ProfileOptions {
        ProfileOptions {
            top_percent: self.top_percent,
            max_contexts: self.max_contexts,
            verbose: self.verbose,
        }
    }
}
