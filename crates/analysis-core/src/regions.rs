//! Region data model shared by the store and the server integration.
//!
//! Every cached analyzer result is anchored to a half-open span `[offset, offset + length)`
//! expressed in document offsets. Regions are plain values; the store owns the lists that hold
//! them and patches them in place when the local document changes.

use serde::{Deserialize, Serialize};

/// A half-open offset range (`offset..offset + length`) in a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Region {
    /// Start offset (inclusive).
    pub offset: usize,
    /// Span length.
    pub length: usize,
}

impl Region {
    /// Create a new region.
    pub const fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    /// Returns `true` if the region covers no characters.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns `true` if `pos` lies inside the region.
    pub fn contains(&self, pos: usize) -> bool {
        pos >= self.offset && pos < self.end()
    }

    /// Move the region start by a signed amount.
    pub fn shift(&mut self, delta: isize) {
        debug_assert!(
            delta >= 0 || self.offset >= delta.unsigned_abs(),
            "region {self:?} shifted before the start of the document by {delta}"
        );
        self.offset = self.offset.saturating_add_signed(delta);
    }

    /// Grow (or shrink, for negative `delta`) the region length.
    pub fn resize(&mut self, delta: isize) {
        debug_assert!(
            delta >= 0 || self.length >= delta.unsigned_abs(),
            "region {self:?} shrunk below zero length by {delta}"
        );
        self.length = self.length.saturating_add_signed(delta);
    }
}

/// Anything that carries a [`Region`] and can be patched by the edit-driven update policies.
pub trait Spanned {
    /// The span this value is anchored to.
    fn region(&self) -> Region;

    /// Mutable access to the span.
    fn region_mut(&mut self) -> &mut Region;

    /// Shift secondary offsets that point into `file` (e.g. navigation targets).
    ///
    /// Called for every value before its own region is tested against an edit, regardless of
    /// whether the value survives the edit.
    fn shift_targets(&mut self, _file: &str, _edit_offset: usize, _delta: isize) {}
}

impl Spanned for Region {
    fn region(&self) -> Region {
        *self
    }

    fn region_mut(&mut self) -> &mut Region {
        self
    }
}

/// Analyzer severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational (hints, lints).
    Info,
    /// Warning.
    Warning,
    /// Error; files holding at least one are reported as "files with errors".
    Error,
}

/// Diagnostic category of an [`ErrorRegion`] (the analyzer's error "type").
///
/// Kept as a string since analyzers add categories over time.
pub type ErrorKind = String;

/// Category used by analyzers for `TODO` comments; such errors are never cached.
pub const TODO_ERROR_KIND: &str = "TODO";

/// A single analyzer error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorRegion {
    /// Span of the error.
    pub region: Region,
    /// File the error was reported for.
    pub file_path: String,
    /// Severity.
    pub severity: Severity,
    /// Diagnostic category (`COMPILE_TIME_ERROR`, `HINT`, `TODO`, ...).
    pub kind: ErrorKind,
    /// Optional machine-readable code.
    pub code: Option<String>,
    /// Human readable message.
    pub message: String,
    /// Optional correction hint.
    pub correction: Option<String>,
    /// Optional documentation url.
    pub url: Option<String>,
}

impl ErrorRegion {
    /// Create an error with no code, correction or url.
    pub fn new(
        file_path: impl Into<String>,
        region: Region,
        severity: Severity,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            region,
            file_path: file_path.into(),
            severity,
            kind: kind.into(),
            code: None,
            message: message.into(),
            correction: None,
            url: None,
        }
    }

    /// Returns `true` for `TODO` markers reported through the error channel.
    pub fn is_todo(&self) -> bool {
        self.kind == TODO_ERROR_KIND
    }
}

impl Spanned for ErrorRegion {
    fn region(&self) -> Region {
        self.region
    }

    fn region_mut(&mut self) -> &mut Region {
        &mut self.region
    }
}

/// Semantic highlight classification.
///
/// The set is closed: tags the client does not know are dropped at ingestion.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HighlightTag {
    Annotation,
    BuiltIn,
    Class,
    CommentBlock,
    CommentDocumentation,
    CommentEndOfLine,
    Constructor,
    ConstructorTearOff,
    Directive,
    DynamicLocalVariableDeclaration,
    DynamicLocalVariableReference,
    DynamicParameterDeclaration,
    DynamicParameterReference,
    DynamicType,
    Enum,
    EnumConstant,
    Extension,
    Field,
    FieldStatic,
    Function,
    FunctionDeclaration,
    FunctionTypeAlias,
    GetterDeclaration,
    IdentifierDefault,
    ImportPrefix,
    InstanceFieldDeclaration,
    InstanceFieldReference,
    InstanceGetterDeclaration,
    InstanceGetterReference,
    InstanceMethodDeclaration,
    InstanceMethodReference,
    InstanceMethodTearOff,
    InstanceSetterDeclaration,
    InstanceSetterReference,
    InvalidStringEscape,
    Keyword,
    Label,
    LibraryName,
    LiteralBoolean,
    LiteralDouble,
    LiteralInteger,
    LiteralList,
    LiteralMap,
    LiteralRecord,
    LiteralString,
    LocalFunctionDeclaration,
    LocalFunctionReference,
    LocalFunctionTearOff,
    LocalVariable,
    LocalVariableDeclaration,
    LocalVariableReference,
    Method,
    MethodDeclaration,
    MethodDeclarationStatic,
    MethodStatic,
    Mixin,
    Parameter,
    ParameterDeclaration,
    ParameterReference,
    SetterDeclaration,
    StaticFieldDeclaration,
    StaticGetterDeclaration,
    StaticGetterReference,
    StaticMethodDeclaration,
    StaticMethodReference,
    StaticMethodTearOff,
    StaticSetterDeclaration,
    StaticSetterReference,
    TopLevelFunctionDeclaration,
    TopLevelFunctionReference,
    TopLevelFunctionTearOff,
    TopLevelGetterDeclaration,
    TopLevelGetterReference,
    TopLevelSetterDeclaration,
    TopLevelSetterReference,
    TopLevelVariable,
    TopLevelVariableDeclaration,
    TypeAlias,
    TypeNameDynamic,
    TypeParameter,
    UnresolvedInstanceMemberReference,
    ValidStringEscape,
}

/// A semantic highlight span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HighlightRegion {
    /// Highlighted span.
    pub region: Region,
    /// Classification.
    pub tag: HighlightTag,
}

impl HighlightRegion {
    /// Create a new highlight.
    pub fn new(offset: usize, length: usize, tag: HighlightTag) -> Self {
        Self {
            region: Region::new(offset, length),
            tag,
        }
    }
}

impl Spanned for HighlightRegion {
    fn region(&self) -> Region {
        self.region
    }

    fn region_mut(&mut self) -> &mut Region {
        &mut self.region
    }
}

/// Where a navigation region leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavigationTarget {
    /// Target file path.
    pub file: String,
    /// Target offset; patched independently of the owning region when `file` is edited.
    pub offset: usize,
    /// Length of the target element.
    pub length: usize,
    /// Element kind (`CLASS`, `METHOD`, ...).
    pub kind: String,
}

/// A clickable span with one or more targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavigationRegion {
    /// Source span.
    pub region: Region,
    /// Ordered targets.
    pub targets: Vec<NavigationTarget>,
}

impl Spanned for NavigationRegion {
    fn region(&self) -> Region {
        self.region
    }

    fn region_mut(&mut self) -> &mut Region {
        &mut self.region
    }

    fn shift_targets(&mut self, file: &str, edit_offset: usize, delta: isize) {
        for target in &mut self.targets {
            if target.file == file && target.offset >= edit_offset {
                target.offset = target.offset.saturating_add_signed(delta);
            }
        }
    }
}

/// A member overridden by the declaration at an [`OverrideRegion`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverriddenMember {
    /// Declaring class.
    pub class_name: String,
    /// Overridden element name.
    pub element_name: String,
    /// Element kind (`METHOD`, `GETTER`, ...).
    pub element_kind: String,
}

/// Override marker for a class member declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverrideRegion {
    /// Span of the overriding member name.
    pub region: Region,
    /// Member overridden in a superclass, if any.
    pub superclass_member: Option<OverriddenMember>,
    /// Members overridden from interfaces, if any.
    pub interface_members: Option<Vec<OverriddenMember>>,
}

impl Spanned for OverrideRegion {
    fn region(&self) -> Region {
        self.region
    }

    fn region_mut(&mut self) -> &mut Region {
        &mut self.region
    }
}

/// Implemented class or member marker.
pub type Marker = Region;

/// Declaration described by an [`Outline`] node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OutlineElement {
    /// Element kind (`CLASS`, `METHOD`, ...).
    pub kind: String,
    /// Declared name.
    pub name: String,
    /// Span of the name, if the element has one in this file.
    pub location: Option<Region>,
    /// Modifier bit set (abstract, const, deprecated, ...).
    pub flags: u32,
    /// Parameter list as source text.
    pub parameters: Option<String>,
    /// Declared return type as source text.
    pub return_type: Option<String>,
}

/// One node of a file's structural outline.
///
/// Outlines are replaced wholesale by the analyzer and never patched for local edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Outline {
    /// The declaration this node stands for.
    pub element: OutlineElement,
    /// Span including leading documentation.
    pub region: Region,
    /// Span of the declaration code itself.
    pub code_region: Region,
    /// Nested declarations, in source order.
    pub children: Vec<Outline>,
}

impl Outline {
    /// Number of nodes in this tree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Outline::node_count).sum::<usize>()
    }

    /// Innermost node whose region contains `offset`.
    pub fn node_at(&self, offset: usize) -> Option<&Outline> {
        if !self.region.contains(offset) {
            return None;
        }
        self.children
            .iter()
            .find_map(|child| child.node_at(offset))
            .or(Some(self))
    }
}

/// Result kinds cached per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Analyzer errors.
    Errors,
    /// Semantic highlights.
    Highlights,
    /// Navigation regions.
    Navigation,
    /// Override markers.
    Overrides,
    /// Implemented class and member markers.
    Implemented,
    /// Structural outline.
    Outline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_end_and_contains() {
        let region = Region::new(5, 10);
        assert_eq!(region.end(), 15);
        assert!(region.contains(5));
        assert!(region.contains(14));
        assert!(!region.contains(15));
        assert!(!Region::new(3, 0).contains(3));
    }

    #[test]
    fn region_ordering_is_offset_then_length() {
        let mut regions = vec![Region::new(4, 1), Region::new(2, 9), Region::new(2, 3)];
        regions.sort();
        assert_eq!(
            regions,
            vec![Region::new(2, 3), Region::new(2, 9), Region::new(4, 1)]
        );
    }

    #[test]
    fn navigation_targets_shift_only_in_edited_file() {
        let mut nav = NavigationRegion {
            region: Region::new(0, 3),
            targets: vec![
                NavigationTarget {
                    file: "/a.dart".to_string(),
                    offset: 10,
                    length: 3,
                    kind: "CLASS".to_string(),
                },
                NavigationTarget {
                    file: "/a.dart".to_string(),
                    offset: 2,
                    length: 3,
                    kind: "FIELD".to_string(),
                },
                NavigationTarget {
                    file: "/b.dart".to_string(),
                    offset: 10,
                    length: 3,
                    kind: "CLASS".to_string(),
                },
            ],
        };

        nav.shift_targets("/a.dart", 5, -2);

        assert_eq!(nav.targets[0].offset, 8);
        assert_eq!(nav.targets[1].offset, 2);
        assert_eq!(nav.targets[2].offset, 10);
    }

    #[test]
    fn outline_lookup_finds_innermost_node() {
        let node = |kind: &str, offset, length, children| Outline {
            element: OutlineElement {
                kind: kind.to_string(),
                ..OutlineElement::default()
            },
            region: Region::new(offset, length),
            code_region: Region::new(offset, length),
            children,
        };
        let unit = node(
            "COMPILATION_UNIT",
            0,
            100,
            vec![node("CLASS", 10, 50, vec![node("METHOD", 20, 10, Vec::new())])],
        );

        assert_eq!(unit.node_count(), 3);
        assert_eq!(unit.node_at(25).map(|n| n.element.kind.as_str()), Some("METHOD"));
        assert_eq!(unit.node_at(40).map(|n| n.element.kind.as_str()), Some("CLASS"));
        assert_eq!(unit.node_at(5).map(|n| n.element.kind.as_str()), Some("COMPILATION_UNIT"));
        assert!(unit.node_at(100).is_none());
    }

    #[test]
    fn highlight_tag_wire_names() {
        use serde::de::IntoDeserializer;
        use serde::de::value::{Error, StrDeserializer};

        let de: StrDeserializer<'_, Error> = "TOP_LEVEL_FUNCTION_DECLARATION".into_deserializer();
        let tag = HighlightTag::deserialize(de).expect("known tag");
        assert_eq!(tag, HighlightTag::TopLevelFunctionDeclaration);
    }
}
