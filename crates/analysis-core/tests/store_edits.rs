use analysis_core::{
    DocumentEdit, ErrorRegion, HighlightRegion, HighlightTag, NavigationRegion, NavigationTarget,
    OverriddenMember, OverrideRegion, Region, RegionKind, RegionStore, Severity, StoreChange,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

const FILE: &str = "/project/lib/main.dart";

fn error(offset: usize, length: usize) -> ErrorRegion {
    ErrorRegion::new(
        FILE,
        Region::new(offset, length),
        Severity::Error,
        "COMPILE_TIME_ERROR",
        "Undefined name 'x'.",
    )
}

fn populate(store: &RegionStore) {
    store.computed_errors(FILE, vec![error(10, 5)]);
    store.computed_highlights(FILE, vec![HighlightRegion::new(5, 5, HighlightTag::Keyword)]);
    store.computed_navigation(
        FILE,
        vec![NavigationRegion {
            region: Region::new(20, 4),
            targets: vec![NavigationTarget {
                file: FILE.to_string(),
                offset: 40,
                length: 4,
                kind: "CLASS".to_string(),
            }],
        }],
    );
    store.computed_overrides(
        FILE,
        vec![OverrideRegion {
            region: Region::new(30, 3),
            superclass_member: Some(OverriddenMember {
                class_name: "Base".to_string(),
                element_name: "run".to_string(),
                element_kind: "METHOD".to_string(),
            }),
            interface_members: None,
        }],
    );
    store.computed_implemented(FILE, vec![Region::new(50, 4)], vec![Region::new(60, 2)]);
}

#[test]
fn insertion_before_error_shifts_it() {
    let store = RegionStore::new();
    store.computed_errors(FILE, vec![error(10, 5)]);

    store.on_document_changed(FILE, &DocumentEdit::insertion(0, 3));

    assert_eq!(store.errors(FILE)[0].region, Region::new(13, 5));
}

#[test]
fn deletion_inside_highlight_shrinks_it() {
    let store = RegionStore::new();
    store.computed_highlights(FILE, vec![HighlightRegion::new(5, 5, HighlightTag::Keyword)]);

    store.on_document_changed(FILE, &DocumentEdit::deletion(8, 2));

    assert_eq!(
        *store.highlights(FILE),
        vec![HighlightRegion::new(5, 3, HighlightTag::Keyword)]
    );
}

#[test]
fn deletion_inside_error_removes_it() {
    let store = RegionStore::new();
    store.computed_errors(FILE, vec![error(5, 5)]);

    store.on_document_changed(FILE, &DocumentEdit::deletion(8, 2));

    assert!(store.errors(FILE).is_empty());
}

#[test]
fn flushed_file_loses_every_kind() {
    let store = RegionStore::new();
    populate(&store);

    store.on_files_flushed(&[FILE]);

    assert!(store.errors(FILE).is_empty());
    assert!(store.highlights(FILE).is_empty());
    assert!(store.navigation(FILE).is_empty());
    assert!(store.overrides(FILE).is_empty());
    assert!(store.implemented_classes(FILE).is_empty());
    assert!(store.implemented_members(FILE).is_empty());
}

#[test]
fn closing_a_file_keeps_its_errors() {
    let store = RegionStore::new();
    populate(&store);

    store.on_file_closed(FILE);

    assert_eq!(store.errors(FILE).len(), 1);
    assert!(store.highlights(FILE).is_empty());
    assert!(store.navigation(FILE).is_empty());
    assert!(store.overrides(FILE).is_empty());
    assert!(store.implemented_classes(FILE).is_empty());
}

#[test]
fn results_for_dirty_file_are_ignored() {
    let store = RegionStore::new();
    populate(&store);
    store.on_document_changed(FILE, &DocumentEdit::insertion(0, 1));
    let errors = store.errors(FILE);
    let highlights = store.highlights(FILE);

    assert!(!store.computed_errors(FILE, vec![error(0, 1)]));
    assert!(!store.computed_highlights(FILE, Vec::new()));
    assert!(!store.computed_navigation(FILE, Vec::new()));
    assert!(!store.computed_overrides(FILE, Vec::new()));
    assert!(!store.computed_implemented(FILE, Vec::new(), Vec::new()));

    assert_eq!(store.errors(FILE), errors);
    assert_eq!(store.highlights(FILE), highlights);
    assert_eq!(store.navigation(FILE)[0].region, Region::new(21, 4));
}

#[test]
fn results_for_other_files_pass_while_one_file_is_dirty() {
    const OTHER: &str = "/project/lib/other.dart";
    let store = RegionStore::new();
    populate(&store);
    let generation = store.on_document_changed(FILE, &DocumentEdit::insertion(0, 1));
    let errors = store.errors(FILE);
    let highlights = store.highlights(FILE);

    let other_error = ErrorRegion::new(OTHER, Region::new(3, 2), Severity::Warning, "HINT", "unused");
    assert!(store.computed_errors(OTHER, vec![other_error]));
    assert!(store.computed_highlights(OTHER, vec![HighlightRegion::new(0, 4, HighlightTag::Keyword)]));

    assert_eq!(store.errors(OTHER).len(), 1);
    assert_eq!(store.highlights(OTHER)[0].region, Region::new(0, 4));
    assert!(!store.has_unsent_local_changes(OTHER));

    assert!(store.has_unsent_local_changes(FILE));
    assert_eq!(store.edit_generation(FILE), generation);
    assert_eq!(store.dirty_files(), vec![FILE.to_string()]);
    assert!(Arc::ptr_eq(&store.errors(FILE), &errors));
    assert!(Arc::ptr_eq(&store.highlights(FILE), &highlights));
}

#[test]
fn navigation_target_shifts_even_if_region_survives_untouched() {
    let store = RegionStore::new();
    populate(&store);

    // Edit lies between the navigation region and its target.
    store.on_document_changed(FILE, &DocumentEdit::insertion(35, 2));

    let nav = store.navigation(FILE);
    assert_eq!(nav[0].region, Region::new(20, 4));
    assert_eq!(nav[0].targets[0].offset, 42);
}

#[test]
fn every_kind_is_patched_by_one_edit() {
    let store = RegionStore::new();
    populate(&store);

    store.on_document_changed(FILE, &DocumentEdit::insertion(0, 10));

    assert_eq!(store.errors(FILE)[0].region, Region::new(20, 5));
    assert_eq!(store.highlights(FILE)[0].region, Region::new(15, 5));
    assert_eq!(store.navigation(FILE)[0].region, Region::new(30, 4));
    assert_eq!(store.navigation(FILE)[0].targets[0].offset, 50);
    assert_eq!(store.overrides(FILE)[0].region, Region::new(40, 3));
    assert_eq!(*store.implemented_classes(FILE), vec![Region::new(60, 4)]);
    assert_eq!(*store.implemented_members(FILE), vec![Region::new(70, 2)]);
}

#[test]
fn listeners_see_changes_per_kind() {
    let store = Arc::new(RegionStore::new());
    let seen: Arc<Mutex<Vec<StoreChange>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        let reader = store.clone();
        store.subscribe(move |change| {
            // Reading from the store inside a listener must not deadlock.
            let _ = reader.errors(&change.file);
            seen.lock().unwrap().push(change.clone());
        });
    }

    store.computed_errors(FILE, vec![error(10, 5)]);
    store.computed_highlights(FILE, vec![HighlightRegion::new(0, 2, HighlightTag::Class)]);
    store.on_file_closed(FILE);

    let kinds: Vec<RegionKind> = seen.lock().unwrap().iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![RegionKind::Errors, RegionKind::Highlights, RegionKind::Highlights]
    );
}

#[test]
fn concurrent_edits_on_different_files() {
    let store = Arc::new(RegionStore::new());
    let files: Vec<String> = (0..8).map(|i| format!("/project/lib/f{i}.dart")).collect();
    for file in &files {
        store.computed_highlights(file, vec![HighlightRegion::new(100, 4, HighlightTag::Keyword)]);
    }

    let handles: Vec<_> = files
        .iter()
        .cloned()
        .map(|file| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    store.on_document_changed(&file, &DocumentEdit::insertion(0, 1));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for file in &files {
        assert_eq!(store.highlights(file)[0].region, Region::new(150, 4));
        assert_eq!(store.edit_generation(file), 50);
    }
    assert_eq!(store.dirty_files().len(), 8);
}
