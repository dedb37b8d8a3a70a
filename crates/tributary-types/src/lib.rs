//! Shared types for the Tributary feed tools.
//!
//! This crate provides the foundational types used across all other Tributary
//! crates:
//! - `Error` — unified error taxonomy
//! - record types mirroring the backend payloads (`InstanceRecord`,
//!   `FileRecord`, `PipingRecord`, ...)
//! - `PluginCatalog` — plugin identities and declared capabilities

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a feed (the overall instance graph).
pub type FeedId = u64;
/// Identifies one execution instance within a feed.
pub type InstanceId = u64;
/// Identifies a node of a reusable pipeline definition.
pub type PipingId = u64;
/// Identifies a plugin in the catalog.
pub type PluginId = u64;

/// Unified error type for all Tributary subsystems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // === Structural errors (fail fast, never build a wrong tree) ===
    #[error("path '{path}' does not extend prefix '{prefix}'")]
    PathPrefix { path: String, prefix: String },

    #[error("instance {id} appears more than once in the record set")]
    DuplicateInstance { id: InstanceId },

    #[error("instance {id} names itself as its previous instance")]
    SelfReference { id: InstanceId },

    #[error("previous-pointer cycle: {remaining} record(s) unreachable from any root")]
    CyclicChain { remaining: usize },

    // === Pipeline definition errors ===
    #[error("piping {piping} appears more than once in the pipeline definition")]
    DuplicatePiping { piping: PipingId },

    #[error("piping {piping} points at unknown previous piping {previous}")]
    UnknownPrevious { piping: PipingId, previous: PipingId },

    #[error("pipeline definition has a dependency cycle involving {remaining} piping(s)")]
    PipelineCycle { remaining: usize },

    #[error("piping {piping} reached before its dependency; plan is not in dependency order")]
    PlanOrder { piping: PipingId },

    // === Backend API errors ===
    #[error("backend returned HTTP {status}: {message}")]
    Api {
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("rate limited by backend, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("authentication with the backend failed")]
    Auth,

    #[error("transport failure: {message}")]
    Transport { message: String },

    #[error("instance creation rejected: {message}")]
    Rejected {
        message: String,
        fields: HashMap<String, String>,
    },

    // === Generic ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns `true` if the error is transient and the call may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::Api { retryable: true, .. }
        )
    }

    /// Returns `true` for precondition violations in the input data, as opposed
    /// to failures of the backend or the transport.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::PathPrefix { .. }
                | Error::DuplicateInstance { .. }
                | Error::SelfReference { .. }
                | Error::CyclicChain { .. }
                | Error::DuplicatePiping { .. }
                | Error::UnknownPrevious { .. }
                | Error::PipelineCycle { .. }
                | Error::PlanOrder { .. }
        )
    }
}

/// A convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Instance records
// ---------------------------------------------------------------------------

/// Lifecycle state of an execution instance, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Created,
    Scheduled,
    Started,
    Finished,
    Errored,
    Cancelled,
}

impl InstanceStatus {
    /// Whether the instance has reached a state it will never leave.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceStatus::Finished | InstanceStatus::Errored | InstanceStatus::Cancelled
        )
    }
}

/// Plugin family of an instance: feed source, data transform, or topological
/// join (the fan-in family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Fs,
    Ds,
    Ts,
}

/// One execution of a plugin within a feed. Read-only snapshot; refetched
/// wholesale, never patched incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub previous_id: Option<InstanceId>,
    pub plugin_id: PluginId,
    pub plugin_name: String,
    pub plugin_version: String,
    pub kind: InstanceKind,
    pub status: InstanceStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

/// One output file of an instance. `resource` is an opaque handle the viewer
/// layer dereferences; this core never fetches content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    pub resource: String,
}

// ---------------------------------------------------------------------------
// Plugin parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Float,
    Boolean,
    Path,
}

/// Declared parameter of a plugin, as listed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginParameter {
    pub name: String,
    pub flag: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    pub optional: bool,
    #[serde(default)]
    pub help: String,
}

/// A concrete parameter value attached to an instance or a piping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: serde_json::Value,
}

impl ParameterValue {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// The value as a string slice, when it is a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

// ---------------------------------------------------------------------------
// Compute resources
// ---------------------------------------------------------------------------

/// A named execution environment an instance can be scheduled on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResource {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

// ---------------------------------------------------------------------------
// Pipeline definitions
// ---------------------------------------------------------------------------

/// A node within a reusable pipeline definition. `previous` is a
/// pipeline-local pointer; `None` marks the piping that attaches to the
/// instance the pipeline is run against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipingRecord {
    pub id: PipingId,
    #[serde(default)]
    pub previous: Option<PipingId>,
    pub plugin_name: String,
    pub plugin_version: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl PipingRecord {
    /// Display title: the explicit title when set, the plugin name otherwise.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.plugin_name)
    }
}

// ---------------------------------------------------------------------------
// Plugin catalog
// ---------------------------------------------------------------------------

/// Declares that a plugin consumes multiple ancestors, naming the parameter
/// that carries the comma-separated ancestor id list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanInSpec {
    pub parameter: String,
}

/// A catalog entry: plugin identity plus declared capabilities. Fan-in is a
/// declared capability here, never inferred from the plugin name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub id: PluginId,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub fan_in: Option<FanInSpec>,
}

/// The set of plugins known to a deployment, keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginCatalog {
    plugins: HashMap<PluginId, Plugin>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plugin: Plugin) {
        self.plugins.insert(plugin.id, plugin);
    }

    pub fn get(&self, id: PluginId) -> Option<&Plugin> {
        self.plugins.get(&id)
    }

    /// Look up a plugin by exact name and version.
    pub fn find(&self, name: &str, version: &str) -> Option<&Plugin> {
        self.plugins
            .values()
            .find(|p| p.name == name && p.version == version)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl FromIterator<Plugin> for PluginCatalog {
    fn from_iter<I: IntoIterator<Item = Plugin>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for plugin in iter {
            catalog.insert(plugin);
        }
        catalog
    }
}

// ---------------------------------------------------------------------------
// Instance creation request
// ---------------------------------------------------------------------------

/// Payload for one instance-creation call. Assembled by the sequencer, sent
/// by the API client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateInstance {
    pub previous_id: Option<InstanceId>,
    pub parameters: HashMap<String, serde_json::Value>,
    pub compute_resource_name: Option<String>,
}

impl CreateInstance {
    /// Flatten into the wire shape: `previous_id`, then the parameter map,
    /// then `compute_resource_name` when set.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(prev) = self.previous_id {
            body.insert("previous_id".into(), serde_json::json!(prev));
        }
        for (name, value) in &self.parameters {
            body.insert(name.clone(), value.clone());
        }
        if let Some(ref name) = self.compute_resource_name {
            body.insert("compute_resource_name".into(), serde_json::json!(name));
        }
        serde_json::Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_path_prefix() {
        let err = Error::PathPrefix {
            path: "elsewhere/scan.dcm".into(),
            prefix: "root".into(),
        };
        assert_eq!(
            err.to_string(),
            "path 'elsewhere/scan.dcm' does not extend prefix 'root'"
        );
    }

    #[test]
    fn error_display_cyclic_chain() {
        let err = Error::CyclicChain { remaining: 3 };
        assert_eq!(
            err.to_string(),
            "previous-pointer cycle: 3 record(s) unreachable from any root"
        );
    }

    #[test]
    fn error_display_unknown_previous() {
        let err = Error::UnknownPrevious {
            piping: 7,
            previous: 9,
        };
        assert_eq!(
            err.to_string(),
            "piping 7 points at unknown previous piping 9"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::RateLimited { retry_after_ms: 500 }.is_retryable());
        assert!(Error::Api {
            status: 503,
            message: "unavailable".into(),
            retryable: true,
        }
        .is_retryable());
        assert!(!Error::Api {
            status: 400,
            message: "bad request".into(),
            retryable: false,
        }
        .is_retryable());
        assert!(!Error::Auth.is_retryable());
    }

    #[test]
    fn structural_classification() {
        assert!(Error::SelfReference { id: 4 }.is_structural());
        assert!(Error::PlanOrder { piping: 2 }.is_structural());
        assert!(!Error::Auth.is_structural());
        assert!(!Error::Other("x".into()).is_structural());
    }

    #[test]
    fn instance_status_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Finished).unwrap(),
            "\"finished\""
        );
        let status: InstanceStatus = serde_json::from_str("\"errored\"").unwrap();
        assert_eq!(status, InstanceStatus::Errored);
    }

    #[test]
    fn instance_status_terminal() {
        assert!(InstanceStatus::Finished.is_terminal());
        assert!(InstanceStatus::Cancelled.is_terminal());
        assert!(!InstanceStatus::Started.is_terminal());
        assert!(!InstanceStatus::Created.is_terminal());
    }

    #[test]
    fn instance_kind_round_trip() {
        assert_eq!(serde_json::to_string(&InstanceKind::Ts).unwrap(), "\"ts\"");
        let kind: InstanceKind = serde_json::from_str("\"fs\"").unwrap();
        assert_eq!(kind, InstanceKind::Fs);
    }

    #[test]
    fn piping_display_title_falls_back_to_plugin_name() {
        let titled = PipingRecord {
            id: 1,
            previous: None,
            plugin_name: "mri-convert".into(),
            plugin_version: "1.2".into(),
            title: Some("Convert scans".into()),
        };
        assert_eq!(titled.display_title(), "Convert scans");

        let untitled = PipingRecord {
            id: 2,
            previous: Some(1),
            plugin_name: "mri-segment".into(),
            plugin_version: "0.9".into(),
            title: None,
        };
        assert_eq!(untitled.display_title(), "mri-segment");
    }

    #[test]
    fn catalog_find_by_name_and_version() {
        let catalog: PluginCatalog = [
            Plugin {
                id: 10,
                name: "dircopy".into(),
                version: "2.1".into(),
                fan_in: None,
            },
            Plugin {
                id: 11,
                name: "merge".into(),
                version: "1.0".into(),
                fan_in: Some(FanInSpec {
                    parameter: "source_instances".into(),
                }),
            },
        ]
        .into_iter()
        .collect();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.find("dircopy", "2.1").unwrap().id, 10);
        assert!(catalog.find("dircopy", "9.9").is_none());
        assert!(catalog.get(11).unwrap().fan_in.is_some());
        assert!(catalog.get(99).is_none());
    }

    #[test]
    fn create_instance_payload_shape() {
        let mut parameters = HashMap::new();
        parameters.insert("threshold".to_string(), serde_json::json!(0.5));

        let req = CreateInstance {
            previous_id: Some(42),
            parameters,
            compute_resource_name: Some("gpu-cluster".into()),
        };
        let payload = req.to_payload();

        assert_eq!(payload["previous_id"], serde_json::json!(42));
        assert_eq!(payload["threshold"], serde_json::json!(0.5));
        assert_eq!(payload["compute_resource_name"], serde_json::json!("gpu-cluster"));
    }

    #[test]
    fn create_instance_payload_omits_absent_fields() {
        let req = CreateInstance::default();
        let payload = req.to_payload();
        let obj = payload.as_object().unwrap();
        assert!(obj.is_empty());
    }
}
