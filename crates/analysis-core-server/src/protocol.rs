//! Analysis server wire protocol.
//!
//! Three message shapes travel over the connection:
//!
//! - request: `{"id": "<n>", "method": "<domain.name>", "params": {...}}`
//! - response: `{"id": "<n>", "result": {...}}` or `{"id": "<n>", "error": {...}}`
//! - notification: `{"event": "<domain.name>", "params": {...}}`
//!
//! Notification payloads are decoded into `analysis-core` region types. Malformed entries are
//! skipped with a debug log; a payload that cannot be decoded at all yields `None`.

use analysis_core::{
    ErrorRegion, HighlightRegion, HighlightTag, Marker, NavigationRegion, NavigationTarget, Outline,
    OutlineElement, OverriddenMember, OverrideRegion, Region, Severity,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

/// `server.setSubscriptions`
pub const SERVER_SET_SUBSCRIPTIONS: &str = "server.setSubscriptions";
/// `server.shutdown`
pub const SERVER_SHUTDOWN: &str = "server.shutdown";
/// `analysis.setAnalysisRoots`
pub const ANALYSIS_SET_ROOTS: &str = "analysis.setAnalysisRoots";
/// `analysis.setPriorityFiles`
pub const ANALYSIS_SET_PRIORITY_FILES: &str = "analysis.setPriorityFiles";
/// `analysis.setSubscriptions`
pub const ANALYSIS_SET_SUBSCRIPTIONS: &str = "analysis.setSubscriptions";
/// `analysis.updateContent`
pub const ANALYSIS_UPDATE_CONTENT: &str = "analysis.updateContent";
/// `analysis.getErrors`
pub const ANALYSIS_GET_ERRORS: &str = "analysis.getErrors";
/// `analysis.getNavigation`
pub const ANALYSIS_GET_NAVIGATION: &str = "analysis.getNavigation";
/// `analysis.reanalyze`
pub const ANALYSIS_REANALYZE: &str = "analysis.reanalyze";

/// Build a request message.
pub fn request(id: &str, method: &str, params: Value) -> Value {
    if params.is_null() {
        json!({ "id": id, "method": method })
    } else {
        json!({ "id": id, "method": method, "params": params })
    }
}

/// Build a notification message (used by test servers).
pub fn notification(event: &str, params: Value) -> Value {
    json!({ "event": event, "params": params })
}

/// Build a successful response message (used by test servers).
pub fn response(id: &str, result: Value) -> Value {
    json!({ "id": id, "result": result })
}

/// Build an error response message (used by test servers).
pub fn error_response(id: &str, code: &str, message: &str) -> Value {
    json!({ "id": id, "error": { "code": code, "message": message } })
}

/// Params for `server.setSubscriptions`.
pub fn server_subscriptions_params() -> Value {
    json!({ "subscriptions": ["STATUS"] })
}

/// Params for `analysis.setAnalysisRoots`.
pub fn analysis_roots_params(included: &[String], excluded: &[String]) -> Value {
    json!({ "included": included, "excluded": excluded })
}

/// Params for `analysis.setPriorityFiles`.
pub fn priority_files_params(files: &[String]) -> Value {
    json!({ "files": files })
}

/// Params for `analysis.setSubscriptions` covering every pushed result kind.
pub fn analysis_subscriptions_params(files: &[String]) -> Value {
    json!({
        "subscriptions": {
            "HIGHLIGHTS": files,
            "NAVIGATION": files,
            "OVERRIDES": files,
            "IMPLEMENTED": files,
            "OUTLINE": files,
        }
    })
}

/// One entry of an `analysis.updateContent` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentOverlay {
    /// Replace the file's on-disk content with `content`.
    Add {
        /// File path.
        file: String,
        /// Full document text.
        content: String,
    },
    /// Drop a previously added overlay.
    Remove {
        /// File path.
        file: String,
    },
}

impl ContentOverlay {
    /// File this overlay applies to.
    pub fn file(&self) -> &str {
        match self {
            Self::Add { file, .. } | Self::Remove { file } => file,
        }
    }
}

/// Params for `analysis.updateContent`.
pub fn update_content_params(overlays: &[ContentOverlay]) -> Value {
    let mut files = serde_json::Map::new();
    for overlay in overlays {
        let value = match overlay {
            ContentOverlay::Add { content, .. } => json!({ "type": "add", "content": content }),
            ContentOverlay::Remove { .. } => json!({ "type": "remove" }),
        };
        files.insert(overlay.file().to_string(), value);
    }
    json!({ "files": files })
}

/// Params for `analysis.getErrors`.
pub fn get_errors_params(file: &str) -> Value {
    json!({ "file": file })
}

/// Params for `analysis.getNavigation`.
pub fn get_navigation_params(file: &str, offset: usize, length: usize) -> Value {
    json!({ "file": file, "offset": offset, "length": length })
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    /// Error code (`INVALID_PARAMETER`, `SERVER_ERROR`, ...).
    #[serde(default)]
    pub code: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Server-side stack trace.
    #[serde(default)]
    pub stack_trace: Option<String>,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response to one of our requests.
    Response {
        /// Request id.
        id: String,
        /// Result or error object.
        outcome: Result<Value, ResponseError>,
    },
    /// Server-initiated notification.
    Notification {
        /// Event name.
        event: String,
        /// Event params (`null` if absent).
        params: Value,
    },
}

impl Inbound {
    /// Classify a raw message; `None` if it is neither a response nor a notification.
    pub fn from_value(mut value: Value) -> Option<Self> {
        if let Some(event) = value.get("event").and_then(Value::as_str) {
            let event = event.to_string();
            let params = value.get_mut("params").map(Value::take).unwrap_or(Value::Null);
            return Some(Self::Notification { event, params });
        }

        let id = match value.get("id")? {
            Value::String(id) => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };
        let error = value
            .get_mut("error")
            .map(Value::take)
            .filter(|error| !error.is_null());
        let outcome = match error {
            Some(error) => Err(serde_json::from_value(error).unwrap_or_else(|_| ResponseError {
                code: "UNKNOWN".to_string(),
                message: "malformed error object".to_string(),
                stack_trace: None,
            })),
            None => Ok(value.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
        };
        Some(Self::Response { id, outcome })
    }
}

/// `server.status` payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatus {
    /// `analysis.isAnalyzing`, if reported.
    pub analyzing: Option<bool>,
    /// `pub.isListingPackageDirs`, if reported.
    pub listing_package_dirs: Option<bool>,
}

/// `server.error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorParams {
    /// Whether the server is about to exit.
    #[serde(default)]
    pub is_fatal: bool,
    /// Error message.
    #[serde(default)]
    pub message: Option<String>,
    /// Server-side stack trace.
    #[serde(default)]
    pub stack_trace: Option<String>,
}

/// Typed server notifications the session reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    /// `server.connected`
    Connected {
        /// Server version string.
        version: String,
    },
    /// `analysis.errors`
    Errors {
        /// Analyzed file.
        file: String,
        /// All errors for the file.
        errors: Vec<ErrorRegion>,
    },
    /// `analysis.highlights`
    Highlights {
        /// Analyzed file.
        file: String,
        /// Highlight regions with known tags.
        regions: Vec<HighlightRegion>,
    },
    /// `analysis.navigation`
    Navigation {
        /// Analyzed file.
        file: String,
        /// Navigation regions with resolved targets.
        regions: Vec<NavigationRegion>,
    },
    /// `analysis.overrides`
    Overrides {
        /// Analyzed file.
        file: String,
        /// Override markers.
        overrides: Vec<OverrideRegion>,
    },
    /// `analysis.implemented`
    Implemented {
        /// Analyzed file.
        file: String,
        /// Implemented class markers.
        classes: Vec<Marker>,
        /// Implemented member markers.
        members: Vec<Marker>,
    },
    /// `analysis.outline`
    Outline {
        /// Analyzed file.
        file: String,
        /// Outline of the whole file.
        outline: Outline,
    },
    /// `analysis.flushResults`
    FlushResults {
        /// Files whose results are no longer valid.
        files: Vec<String>,
    },
    /// `server.status`
    Status(ServerStatus),
    /// `server.error`
    Error(ServerErrorParams),
}

impl ServerNotification {
    /// Decode a notification by event name; `None` for unknown events or malformed payloads.
    pub fn from_event_and_params(event: &str, params: &Value) -> Option<Self> {
        match event {
            "server.connected" => Some(Self::Connected {
                version: params
                    .get("version")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "analysis.errors" => {
                let file = file_param(params)?;
                let errors = errors_from_value(params.get("errors")?);
                Some(Self::Errors { file, errors })
            }
            "analysis.highlights" => {
                let file = file_param(params)?;
                let regions = list::<WireHighlight>(params.get("regions")?)
                    .into_iter()
                    .filter_map(WireHighlight::into_region)
                    .collect();
                Some(Self::Highlights { file, regions })
            }
            "analysis.navigation" => {
                let file = file_param(params)?;
                let regions = navigation_from_value(params)?;
                Some(Self::Navigation { file, regions })
            }
            "analysis.overrides" => {
                let file = file_param(params)?;
                let overrides = list::<WireOverride>(params.get("overrides")?)
                    .into_iter()
                    .map(WireOverride::into_region)
                    .collect();
                Some(Self::Overrides { file, overrides })
            }
            "analysis.implemented" => {
                let file = file_param(params)?;
                let classes = markers(params.get("classes"));
                let members = markers(params.get("members"));
                Some(Self::Implemented {
                    file,
                    classes,
                    members,
                })
            }
            "analysis.outline" => {
                let file = file_param(params)?;
                let outline = params.get("outline")?.clone();
                let outline = match serde_json::from_value::<WireOutline>(outline) {
                    Ok(outline) => outline.into_outline(),
                    Err(err) => {
                        debug!(error = %err, "dropping malformed outline");
                        return None;
                    }
                };
                Some(Self::Outline { file, outline })
            }
            "analysis.flushResults" => {
                let files = params
                    .get("files")?
                    .as_array()?
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect();
                Some(Self::FlushResults { files })
            }
            "server.status" => {
                let analyzing = params
                    .get("analysis")
                    .and_then(|a| a.get("isAnalyzing"))
                    .and_then(Value::as_bool);
                let listing_package_dirs = params
                    .get("pub")
                    .and_then(|p| p.get("isListingPackageDirs"))
                    .and_then(Value::as_bool);
                Some(Self::Status(ServerStatus {
                    analyzing,
                    listing_package_dirs,
                }))
            }
            "server.error" => serde_json::from_value(params.clone()).ok().map(Self::Error),
            _ => None,
        }
    }
}

/// Decode an `analysis.getErrors` result.
pub fn errors_from_result(result: &Value) -> Option<Vec<ErrorRegion>> {
    Some(errors_from_value(result.get("errors")?))
}

/// Decode an `analysis.getNavigation` result (same shape as the notification payload).
pub fn navigation_from_result(result: &Value) -> Option<Vec<NavigationRegion>> {
    navigation_from_value(result)
}

fn file_param(params: &Value) -> Option<String> {
    params.get("file")?.as_str().map(str::to_string)
}

/// Decode each element of a JSON array independently, skipping the ones that fail.
fn list<T: DeserializeOwned>(value: &Value) -> Vec<T> {
    let Some(items) = value.as_array() else {
        debug!("expected an array in analysis server payload");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                debug!(error = %err, "skipping malformed analysis server item");
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct WireLocation {
    file: String,
    offset: usize,
    length: usize,
}

#[derive(Debug, Deserialize)]
struct WireError {
    severity: Severity,
    #[serde(rename = "type")]
    kind: String,
    location: WireLocation,
    message: String,
    #[serde(default)]
    correction: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

fn errors_from_value(value: &Value) -> Vec<ErrorRegion> {
    list::<WireError>(value)
        .into_iter()
        .map(|e| ErrorRegion {
            region: Region::new(e.location.offset, e.location.length),
            file_path: e.location.file,
            severity: e.severity,
            kind: e.kind,
            code: e.code,
            message: e.message,
            correction: e.correction,
            url: e.url,
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct WireHighlight {
    #[serde(rename = "type")]
    tag: String,
    offset: usize,
    length: usize,
}

impl WireHighlight {
    fn into_region(self) -> Option<HighlightRegion> {
        match serde_json::from_value::<HighlightTag>(Value::String(self.tag)) {
            Ok(tag) => Some(HighlightRegion::new(self.offset, self.length, tag)),
            Err(err) => {
                debug!(error = %err, "dropping highlight with unknown tag");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireNavigationRegion {
    offset: usize,
    length: usize,
    #[serde(default)]
    targets: Vec<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireNavigationTarget {
    kind: String,
    file_index: usize,
    offset: usize,
    length: usize,
}

fn navigation_from_value(params: &Value) -> Option<Vec<NavigationRegion>> {
    let files: Vec<String> = list(params.get("files")?);
    let targets: Vec<WireNavigationTarget> = list(params.get("targets")?);
    let regions: Vec<WireNavigationRegion> = list(params.get("regions")?);

    let resolved = regions
        .into_iter()
        .map(|region| NavigationRegion {
            region: Region::new(region.offset, region.length),
            targets: region
                .targets
                .iter()
                .filter_map(|index| {
                    let target = targets.get(*index)?;
                    let file = files.get(target.file_index)?;
                    Some(NavigationTarget {
                        file: file.clone(),
                        offset: target.offset,
                        length: target.length,
                        kind: target.kind.clone(),
                    })
                })
                .collect(),
        })
        .collect();
    Some(resolved)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireElement {
    #[serde(default)]
    kind: String,
    name: String,
    #[serde(default)]
    location: Option<WireMarker>,
    #[serde(default)]
    flags: u32,
    #[serde(default)]
    parameters: Option<String>,
    #[serde(default)]
    return_type: Option<String>,
}

impl From<WireElement> for OutlineElement {
    fn from(element: WireElement) -> Self {
        Self {
            kind: element.kind,
            name: element.name,
            location: element.location.map(|l| Region::new(l.offset, l.length)),
            flags: element.flags,
            parameters: element.parameters,
            return_type: element.return_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOutline {
    element: WireElement,
    offset: usize,
    length: usize,
    #[serde(default)]
    code_offset: Option<usize>,
    #[serde(default)]
    code_length: Option<usize>,
    #[serde(default)]
    children: Option<Value>,
}

impl WireOutline {
    fn into_outline(self) -> Outline {
        let children = self
            .children
            .as_ref()
            .map(list::<WireOutline>)
            .unwrap_or_default()
            .into_iter()
            .map(WireOutline::into_outline)
            .collect();
        Outline {
            element: self.element.into(),
            region: Region::new(self.offset, self.length),
            code_region: Region::new(
                self.code_offset.unwrap_or(self.offset),
                self.code_length.unwrap_or(self.length),
            ),
            children,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOverriddenMember {
    element: WireElement,
    class_name: String,
}

impl From<WireOverriddenMember> for OverriddenMember {
    fn from(member: WireOverriddenMember) -> Self {
        Self {
            class_name: member.class_name,
            element_name: member.element.name,
            element_kind: member.element.kind,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOverride {
    offset: usize,
    length: usize,
    #[serde(default)]
    superclass_member: Option<WireOverriddenMember>,
    #[serde(default)]
    interface_members: Option<Vec<WireOverriddenMember>>,
}

impl WireOverride {
    fn into_region(self) -> OverrideRegion {
        OverrideRegion {
            region: Region::new(self.offset, self.length),
            superclass_member: self.superclass_member.map(Into::into),
            interface_members: self
                .interface_members
                .map(|members| members.into_iter().map(Into::into).collect()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMarker {
    offset: usize,
    length: usize,
}

fn markers(value: Option<&Value>) -> Vec<Marker> {
    value
        .map(list::<WireMarker>)
        .unwrap_or_default()
        .into_iter()
        .map(|m| Region::new(m.offset, m.length))
        .collect()
}
