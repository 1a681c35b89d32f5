#![warn(missing_docs)]
//! `analysis-core` - per-file caches of analyzer results that stay aligned with local edits.
//!
//! An external analyzer pushes errors, semantic highlights, navigation regions, override markers,
//! implemented markers and outlines for the files it analyzes. Between the moment the user types
//! and the moment the analyzer reports again, those results describe stale text. This crate keeps
//! them usable in the meantime:
//!
//! - [`regions`]: the region data model (`offset`/`length` spans plus typed payloads).
//! - [`edit`]: the geometry of a local document change.
//! - [`patch`]: the two edit-driven update policies (drop touched regions, or resize them).
//! - [`store`]: the concurrent per-file cache with its "unsent local changes" gate.
//!
//! Process management and the wire protocol live in `analysis-core-server`.

pub mod edit;
pub mod patch;
pub mod regions;
pub mod store;

pub use edit::DocumentEdit;
pub use patch::{update_regions_deleting_touched, update_regions_updating_touched};
pub use regions::{
    ErrorKind, ErrorRegion, HighlightRegion, HighlightTag, Marker, NavigationRegion,
    NavigationTarget, Outline, OutlineElement, OverriddenMember, OverrideRegion, Region, RegionKind,
    Severity, Spanned, TODO_ERROR_KIND,
};
pub use store::{ListenerId, RegionStore, Snapshot, StoreChange, StoreListener};
