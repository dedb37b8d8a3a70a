use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tributary_types::{
    ComputeResource, CreateInstance, FeedId, FileRecord, InstanceId, InstanceRecord,
    ParameterValue, PluginId, PluginParameter, Result,
};

// ---------------------------------------------------------------------------
// Page — one slice of a paged collection
// ---------------------------------------------------------------------------

/// One page of a backend collection. `next` is an absolute URL to the
/// following page, absent on the last one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
}

// ---------------------------------------------------------------------------
// FeedApi — the backend surface this core consumes
// ---------------------------------------------------------------------------

/// The backend operations the graph builders and the sequencer depend on.
///
/// Every listing returns the fully drained collection; pagination is an
/// implementation concern of the adapter. Implementations must be safe to
/// share across tasks (`Send + Sync`), but nothing here requires interior
/// mutability.
#[async_trait]
pub trait FeedApi: Send + Sync {
    /// All execution instances of a feed.
    async fn list_instances(&self, feed_id: FeedId) -> Result<Vec<InstanceRecord>>;

    /// All output files of an instance.
    async fn list_files(&self, instance_id: InstanceId) -> Result<Vec<FileRecord>>;

    /// The concrete parameter values an instance was created with.
    async fn instance_parameters(&self, instance_id: InstanceId) -> Result<Vec<ParameterValue>>;

    /// The declared parameters of a plugin.
    async fn plugin_parameters(&self, plugin_id: PluginId) -> Result<Vec<PluginParameter>>;

    /// Execution environments a plugin can run on, in backend preference order.
    async fn compute_resources(&self, plugin_id: PluginId) -> Result<Vec<ComputeResource>>;

    /// Create a new instance of a plugin. Each call is a fresh side effect;
    /// the backend never deduplicates.
    async fn create_instance(
        &self,
        plugin_id: PluginId,
        request: &CreateInstance,
    ) -> Result<InstanceRecord>;
}
