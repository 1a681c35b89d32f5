use analysis_core::{DocumentEdit, RegionStore};
use analysis_core_server::ServerNotification;
use serde_json::json;

fn apply(store: &RegionStore, event: &str, params: serde_json::Value) {
    match ServerNotification::from_event_and_params(event, &params) {
        Some(ServerNotification::Errors { file, errors }) => {
            let applied = store.computed_errors(&file, errors);
            println!("{event}: applied={applied}");
        }
        Some(ServerNotification::Highlights { file, regions }) => {
            let applied = store.computed_highlights(&file, regions);
            println!("{event}: applied={applied}");
        }
        other => println!("{event}: ignored {:?}", other),
    }
}

fn main() {
    let file = "/demo/lib/main.dart";
    let store = RegionStore::new();
    store.subscribe(|change| println!("  invalidate {} {:?}", change.file, change.kind));

    // void main() { prnt('hi') }
    apply(
        &store,
        "analysis.errors",
        json!({
            "file": file,
            "errors": [{
                "severity": "ERROR",
                "type": "COMPILE_TIME_ERROR",
                "location": { "file": file, "offset": 14, "length": 4, "startLine": 1, "startColumn": 15 },
                "message": "The function 'prnt' isn't defined.",
                "code": "undefined_function",
            }],
        }),
    );
    apply(
        &store,
        "analysis.highlights",
        json!({
            "file": file,
            "regions": [
                { "type": "KEYWORD", "offset": 0, "length": 4 },
                { "type": "TOP_LEVEL_FUNCTION_DECLARATION", "offset": 5, "length": 4 },
                { "type": "LITERAL_STRING", "offset": 19, "length": 4 },
            ],
        }),
    );

    // Type a comment before `void`: everything shifts right.
    let generation = store.on_document_changed(file, &DocumentEdit::insertion(0, 3));
    println!("edit generation={generation} dirty={}", store.has_unsent_local_changes(file));
    for error in store.errors(file).iter() {
        println!("  error {:?} {}", error.region, error.message);
    }
    for highlight in store.highlights(file).iter() {
        println!("  highlight {:?} {:?}", highlight.region, highlight.tag);
    }

    // Fix the typo: `prnt` -> `print` touches the error, which is dropped.
    store.on_document_changed(file, &DocumentEdit::new(19, 2, 3));
    println!("errors after fix: {}", store.errors(file).len());

    // Stale results are ignored until the server has seen the new text.
    apply(&store, "analysis.errors", json!({ "file": file, "errors": [] }));
    store.acknowledge_content(&[(file, store.edit_generation(file))]);
    apply(&store, "analysis.errors", json!({ "file": file, "errors": [] }));
}
