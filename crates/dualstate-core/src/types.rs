use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique key of an interface: file path + enclosing container + name.
///
/// Renders canonically as `file::container::name` (container omitted when
/// empty). The key is stable across edits that do not rename or move the
/// item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct InterfaceKey {
    pub file_path: String,
    pub container: String,
    pub name: String,
}

impl InterfaceKey {
    pub fn new(
        file_path: impl Into<String>,
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            container: container.into(),
            name: name.into(),
        }
    }

    /// Canonical string form, used for persistence and hashing.
    pub fn canonical(&self) -> String {
        if self.container.is_empty() {
            format!("{}::{}", self.file_path, self.name)
        } else {
            format!("{}::{}::{}", self.file_path, self.container, self.name)
        }
    }

    /// Parse the canonical form. The first `::` ends the file path, the last
    /// one starts the name; anything between is the (possibly nested)
    /// container.
    pub fn parse(s: &str) -> Option<Self> {
        let (file_path, rest) = s.split_once("::")?;
        if file_path.is_empty() || rest.is_empty() {
            return None;
        }
        let (container, name) = match rest.rsplit_once("::") {
            Some((c, n)) => (c, n),
            None => ("", rest),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self::new(file_path, container, name))
    }
}

impl fmt::Display for InterfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<InterfaceKey> for String {
    fn from(key: InterfaceKey) -> Self {
        key.canonical()
    }
}

impl TryFrom<String> for InterfaceKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        InterfaceKey::parse(&value).ok_or_else(|| format!("malformed interface key: {value}"))
    }
}

/// What kind of item an interface node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    Function,
    Type,
    Trait,
    Module,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Function => "function",
            InterfaceKind::Type => "type",
            InterfaceKind::Trait => "trait",
            InterfaceKind::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(InterfaceKind::Function),
            "type" => Some(InterfaceKind::Type),
            "trait" => Some(InterfaceKind::Trait),
            "module" => Some(InterfaceKind::Module),
            _ => None,
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Crate,
    #[default]
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Crate => "crate",
            Visibility::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "crate" => Some(Visibility::Crate),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

/// Qualifier flags carried by a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InterfaceFlags {
    #[serde(default)]
    pub is_unsafe: bool,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_const: bool,
}

/// A generic parameter with its declared bounds. Lifetimes are parameters
/// whose name starts with `'`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericParam {
    pub name: String,
    #[serde(default)]
    pub bounds: Vec<String>,
}

impl GenericParam {
    pub fn new(name: impl Into<String>, bounds: &[&str]) -> Self {
        Self {
            name: name.into(),
            bounds: bounds.iter().map(|b| b.to_string()).collect(),
        }
    }

    pub fn is_lifetime(&self) -> bool {
        self.name.starts_with('\'')
    }
}

/// Source span of an interface (1-based, inclusive lines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub end_line: u32,
}

impl Span {
    pub fn new(start_line: u32, end_line: u32) -> Self {
        Self {
            start_line,
            end_line,
        }
    }

    pub fn contains(&self, line: u32) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// A node in the interface graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceNode {
    pub id: u64,
    pub key: InterfaceKey,
    pub kind: InterfaceKind,
    pub visibility: Visibility,
    pub signature: String,
    pub signature_hash: String,
    pub body_hash: String,
    pub generics: Vec<GenericParam>,
    pub flags: InterfaceFlags,
    pub span: Span,
    /// Source slice of the interface, when the parser supplied it.
    pub code: Option<String>,
    /// Short natural-language summary used for embedding.
    pub summary: Option<String>,
    pub renamed_from: Option<InterfaceKey>,
}

impl InterfaceNode {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

/// Edge types between interface nodes. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeType {
    Calls,
    DependsOn,
    UsesType,
    DefinesInScope,
}

impl EdgeType {
    pub const ALL: [EdgeType; 4] = [
        EdgeType::Calls,
        EdgeType::DependsOn,
        EdgeType::UsesType,
        EdgeType::DefinesInScope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Calls => "calls",
            EdgeType::DependsOn => "depends-on",
            EdgeType::UsesType => "uses-type",
            EdgeType::DefinesInScope => "defines-in-scope",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(EdgeType::Calls),
            "depends-on" => Some(EdgeType::DependsOn),
            "uses-type" => Some(EdgeType::UsesType),
            "defines-in-scope" => Some(EdgeType::DefinesInScope),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge between two interface keys of the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: InterfaceKey,
    pub to: InterfaceKey,
    pub edge_type: EdgeType,
}

/// Direction for edge traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Incoming,
    Outgoing,
    Both,
}

pub type ScopeId = u32;

/// A lexical scope. Parent pointers form a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub name: String,
    #[serde(default)]
    pub owner: Option<InterfaceKey>,
}

/// Maps a name to an interface within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub scope: ScopeId,
    pub name: String,
    pub target: InterfaceKey,
}

/// Rename lineage: `to` was previously known as `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenameRecord {
    pub from: InterfaceKey,
    pub to: InterfaceKey,
}

/// What a proposal intends to do to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FutureAction {
    Create,
    Edit,
    Delete,
    None,
}

impl FutureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FutureAction::Create => "create",
            FutureAction::Edit => "edit",
            FutureAction::Delete => "delete",
            FutureAction::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(FutureAction::Create),
            "edit" => Some(FutureAction::Edit),
            "delete" => Some(FutureAction::Delete),
            "none" => Some(FutureAction::None),
            _ => None,
        }
    }

    pub fn is_inert(&self) -> bool {
        *self == FutureAction::None
    }
}

impl fmt::Display for FutureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationStatus {
    Pending,
    Passed,
    Failed,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Passed => "passed",
            ValidationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ValidationStatus::Pending),
            "passed" => Some(ValidationStatus::Passed),
            "failed" => Some(ValidationStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the change ledger. At most one row exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLedgerRow {
    pub key: InterfaceKey,
    pub current_present: bool,
    pub future_present: bool,
    pub current_code: Option<String>,
    pub future_code: Option<String>,
    pub future_action: FutureAction,
    pub validation_status: ValidationStatus,
    /// Lines of `current_code` in its file, when the parser reported them.
    #[serde(default)]
    pub current_span: Option<Span>,
    /// Set by the apply loop once the row's code reached the working tree.
    #[serde(default)]
    pub applied: bool,
}

/// Accepted/rejected counters for one pattern record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatternOutcome {
    pub accepted: u64,
    pub rejected: u64,
}

impl PatternOutcome {
    /// Laplace-smoothed acceptance rate in (0, 1). 0.5 with no history.
    pub fn learned_weight(&self) -> f64 {
        (self.accepted as f64 + 1.0) / ((self.accepted + self.rejected) as f64 + 2.0)
    }
}

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt row in {table}: {detail}")]
    CorruptRow { table: &'static str, detail: String },

    #[error("Schema migration required: v{from} -> v{to}")]
    SchemaMigration { from: u32, to: u32 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for GraphError {
    fn from(e: rusqlite::Error) -> Self {
        GraphError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::Serialization(e.to_string())
    }
}
