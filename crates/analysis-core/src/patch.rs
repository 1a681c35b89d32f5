//! Edit-driven patching of cached region lists.
//!
//! Two policies exist:
//! - [`update_regions_deleting_touched`]: regions an edit reaches into are dropped (errors,
//!   navigation, overrides, implemented markers).
//! - [`update_regions_updating_touched`]: regions that fully contain an edit grow or shrink with
//!   it (highlights).
//!
//! Regions entirely after the edit are shifted by `delta = new_length - old_length`. A
//! zero-delta edit takes the deletion branch with an empty deleted range, so only the
//! touch test applies.

use crate::edit::DocumentEdit;
use crate::regions::Spanned;

/// Patch `regions` for `edit` in `file`, dropping regions the edit touches.
///
/// Navigation targets pointing into `file` at or after the edit offset are shifted first,
/// whether or not their owning region survives.
///
/// Returns `true` if at least one region was removed.
pub fn update_regions_deleting_touched<T: Spanned>(
    file: &str,
    regions: &mut Vec<T>,
    edit: &DocumentEdit,
) -> bool {
    let offset = edit.offset as isize;
    let delta = edit.delta();
    let mut removed = false;

    regions.retain_mut(|item| {
        item.shift_targets(file, edit.offset, delta);

        let region = item.region();
        let start = region.offset as isize;
        let end = region.end() as isize;

        if delta > 0 {
            if offset <= start {
                item.region_mut().shift(delta);
            } else if offset < end {
                removed = true;
                return false;
            }
        } else {
            let right = offset - delta;
            if right <= start {
                item.region_mut().shift(delta);
            } else if offset < end {
                removed = true;
                return false;
            }
        }
        true
    });

    removed
}

/// Patch `regions` for `edit`, resizing regions that contain the edit instead of dropping them.
///
/// A deletion that exactly covers a region, or one that straddles a region boundary, still
/// removes it.
pub fn update_regions_updating_touched<T: Spanned>(
    file: &str,
    regions: &mut Vec<T>,
    edit: &DocumentEdit,
) {
    let offset = edit.offset as isize;
    let delta = edit.delta();

    regions.retain_mut(|item| {
        item.shift_targets(file, edit.offset, delta);

        let region = item.region();
        let start = region.offset as isize;
        let end = region.end() as isize;

        if delta > 0 {
            if offset <= start {
                item.region_mut().shift(delta);
            } else if offset < end {
                item.region_mut().resize(delta);
            }
        } else {
            let right = offset - delta;
            if right <= start {
                item.region_mut().shift(delta);
            } else if start <= offset && right <= end && region.length as isize != -delta {
                item.region_mut().resize(delta);
            } else if offset < end {
                return false;
            }
        }
        true
    });
}
