//! Analysis root tracking.
//!
//! The server is only told about roots when they actually change. [`RootsTracker`] remembers the
//! last acknowledged pair and the pair currently in flight, and answers whether a freshly
//! computed [`RootSet`] needs to be pushed.

/// Normalized included/excluded directory lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RootSet {
    included: Vec<String>,
    excluded: Vec<String>,
}

impl RootSet {
    /// Build a root set; both lists are sorted and deduplicated.
    pub fn new(included: impl IntoIterator<Item = String>, excluded: impl IntoIterator<Item = String>) -> Self {
        Self {
            included: normalize(included),
            excluded: normalize(excluded),
        }
    }

    /// Included directories.
    pub fn included(&self) -> &[String] {
        &self.included
    }

    /// Excluded directories.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Returns `true` if nothing is included.
    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }
}

fn normalize(paths: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut paths: Vec<String> = paths.into_iter().collect();
    paths.sort();
    paths.dedup();
    paths
}

/// Source of the desired analysis roots (project model, workspace folders, ...).
pub trait RootsProvider: Send + Sync {
    /// Current roots.
    fn roots(&self) -> RootSet;
}

impl<F> RootsProvider for F
where
    F: Fn() -> RootSet + Send + Sync,
{
    fn roots(&self) -> RootSet {
        self()
    }
}

/// Last acknowledged and in-flight root sets.
#[derive(Debug, Default)]
pub struct RootsTracker {
    acknowledged: Option<RootSet>,
    in_flight: Option<RootSet>,
}

impl RootsTracker {
    /// Create an empty tracker (nothing sent yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `desired` differs from what was last sent.
    pub fn needs_push(&self, desired: &RootSet) -> bool {
        match (&self.in_flight, &self.acknowledged) {
            (Some(in_flight), _) => in_flight != desired,
            (None, Some(acknowledged)) => acknowledged != desired,
            (None, None) => true,
        }
    }

    /// Record that `roots` was sent.
    pub fn mark_sent(&mut self, roots: RootSet) {
        self.in_flight = Some(roots);
    }

    /// Record the server's acknowledgement of `roots`.
    ///
    /// An acknowledgement for a set that has since been superseded does not clear the newer
    /// in-flight set.
    pub fn mark_acknowledged(&mut self, roots: RootSet) {
        if self.in_flight.as_ref() == Some(&roots) {
            self.in_flight = None;
        }
        self.acknowledged = Some(roots);
    }

    /// Forget a failed push so the next change retries.
    pub fn mark_failed(&mut self, roots: &RootSet) {
        if self.in_flight.as_ref() == Some(roots) {
            self.in_flight = None;
        }
    }

    /// The most recent set sent or acknowledged.
    pub fn current(&self) -> Option<&RootSet> {
        self.in_flight.as_ref().or(self.acknowledged.as_ref())
    }

    /// Forget everything (new server process).
    pub fn reset(&mut self) {
        self.acknowledged = None;
        self.in_flight = None;
    }
}
