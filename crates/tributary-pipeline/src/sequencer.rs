//! Dependency-ordered instance creation with per-node failure isolation.
//!
//! The sequencer walks an [`ExecutionPlan`] strictly in order, creating one
//! instance per piping. Creation calls are issued one at a time and awaited,
//! because every call's `previous_id` comes from the result of an earlier
//! one. A failed piping poisons its transitive dependents, nothing else;
//! the batch always runs to the end and returns whatever it managed to
//! create.

use std::collections::{HashMap, HashSet};

use tributary_types::{
    CreateInstance, Error, InstanceId, InstanceRecord, PipingId, PluginCatalog, Result,
};

use tributary_api::FeedApi;

use crate::compute::Assignments;
use crate::plan::ExecutionPlan;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// One per-piping failure. These are data, not `Err`: a partially failed
/// run still yields its created instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// The creation call itself failed, or the plugin could not be resolved.
    Creation {
        piping: PipingId,
        title: String,
        message: String,
    },
    /// An ancestor failed earlier in the run, so this piping was skipped
    /// without a creation call.
    DependencyUnavailable {
        piping: PipingId,
        title: String,
        dependency: PipingId,
    },
}

impl SequenceError {
    pub fn piping(&self) -> PipingId {
        match self {
            SequenceError::Creation { piping, .. } => *piping,
            SequenceError::DependencyUnavailable { piping, .. } => *piping,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            SequenceError::Creation { title, .. } => title,
            SequenceError::DependencyUnavailable { title, .. } => title,
        }
    }
}

/// Result of one sequencer run. `created` preserves plan order, so the
/// last entry is the natural anchor for a follow-on pipeline.
#[derive(Debug, Default)]
pub struct SequenceOutcome {
    pub created: Vec<InstanceRecord>,
    pub errors: Vec<SequenceError>,
}

impl SequenceOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn last_created(&self) -> Option<&InstanceRecord> {
        self.created.last()
    }
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Runs one pipeline against an attachment instance.
///
/// All per-run state (the local-id remap table, the failed set) is owned by
/// the `run` call; two concurrent runs over the same backend share nothing.
/// Every run is a fresh side effect: re-running an identical plan creates a
/// wholly new set of instances.
pub struct Sequencer<'a> {
    api: &'a dyn FeedApi,
}

impl<'a> Sequencer<'a> {
    pub fn new(api: &'a dyn FeedApi) -> Self {
        Self { api }
    }

    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        catalog: &PluginCatalog,
        attachment: InstanceId,
        assignments: &Assignments,
    ) -> Result<SequenceOutcome> {
        let run_id = uuid::Uuid::new_v4();
        tracing::info!(%run_id, attachment, pipings = plan.len(), "sequencing pipeline");

        let mut remap: HashMap<PipingId, InstanceId> = HashMap::new();
        let mut failed: HashSet<PipingId> = HashSet::new();
        let mut outcome = SequenceOutcome::default();

        for piping in plan.pipings() {
            // Resolve the previous instance: the attachment for a root
            // piping, the remapped created id otherwise. A dependency that
            // failed earlier poisons this piping without a creation call.
            let previous_id = match piping.previous {
                None => attachment,
                Some(dependency) => {
                    if failed.contains(&dependency) {
                        tracing::warn!(
                            %run_id,
                            piping = piping.id,
                            dependency,
                            "skipping piping: dependency unavailable"
                        );
                        outcome.errors.push(SequenceError::DependencyUnavailable {
                            piping: piping.id,
                            title: piping.display_title().to_string(),
                            dependency,
                        });
                        failed.insert(piping.id);
                        continue;
                    }
                    match remap.get(&dependency) {
                        Some(&created) => created,
                        // Not failed and not created: the order guarantee
                        // is broken, abort before sending a wrong call.
                        None => return Err(Error::PlanOrder { piping: piping.id }),
                    }
                }
            };

            let plugin = match catalog.find(&piping.plugin_name, &piping.plugin_version) {
                Some(plugin) => plugin,
                None => {
                    outcome.errors.push(SequenceError::Creation {
                        piping: piping.id,
                        title: piping.display_title().to_string(),
                        message: format!(
                            "plugin {}@{} is not in the catalog",
                            piping.plugin_name, piping.plugin_version
                        ),
                    });
                    failed.insert(piping.id);
                    continue;
                }
            };

            let mut parameters = HashMap::new();
            for value in plan.defaults_for(piping.id) {
                parameters.insert(value.name.clone(), value.value.clone());
            }

            let request = CreateInstance {
                previous_id: Some(previous_id),
                parameters,
                compute_resource_name: assignments
                    .selection_for(piping.id)
                    .map(str::to_string),
            };

            match self.api.create_instance(plugin.id, &request).await {
                Ok(created) => {
                    tracing::info!(
                        %run_id,
                        piping = piping.id,
                        instance = created.id,
                        previous = previous_id,
                        "instance created"
                    );
                    remap.insert(piping.id, created.id);
                    outcome.created.push(created);
                }
                Err(err) => {
                    tracing::warn!(
                        %run_id,
                        piping = piping.id,
                        error = %err,
                        "instance creation failed"
                    );
                    outcome.errors.push(SequenceError::Creation {
                        piping: piping.id,
                        title: piping.display_title().to_string(),
                        message: err.to_string(),
                    });
                    failed.insert(piping.id);
                }
            }
        }

        tracing::info!(
            %run_id,
            created = outcome.created.len(),
            failed = outcome.errors.len(),
            "sequencing finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tributary_types::{
        ComputeResource, FeedId, FileRecord, InstanceKind, InstanceStatus, ParameterValue,
        PipingRecord, Plugin, PluginId, PluginParameter,
    };

    struct ScriptedApi {
        next_id: AtomicU64,
        fail_plugins: HashSet<PluginId>,
        calls: Mutex<Vec<(PluginId, CreateInstance)>>,
    }

    impl ScriptedApi {
        fn new() -> Self {
            Self {
                next_id: AtomicU64::new(1000),
                fail_plugins: HashSet::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(plugins: impl IntoIterator<Item = PluginId>) -> Self {
            let mut api = Self::new();
            api.fail_plugins = plugins.into_iter().collect();
            api
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FeedApi for ScriptedApi {
        async fn list_instances(&self, _: FeedId) -> Result<Vec<InstanceRecord>> {
            Err(Error::Other("not used".into()))
        }
        async fn list_files(&self, _: InstanceId) -> Result<Vec<FileRecord>> {
            Err(Error::Other("not used".into()))
        }
        async fn instance_parameters(&self, _: InstanceId) -> Result<Vec<ParameterValue>> {
            Err(Error::Other("not used".into()))
        }
        async fn plugin_parameters(&self, _: PluginId) -> Result<Vec<PluginParameter>> {
            Err(Error::Other("not used".into()))
        }
        async fn compute_resources(&self, _: PluginId) -> Result<Vec<ComputeResource>> {
            Err(Error::Other("not used".into()))
        }
        async fn create_instance(
            &self,
            plugin_id: PluginId,
            request: &CreateInstance,
        ) -> Result<InstanceRecord> {
            self.calls
                .lock()
                .unwrap()
                .push((plugin_id, request.clone()));
            if self.fail_plugins.contains(&plugin_id) {
                return Err(Error::Api {
                    status: 500,
                    message: "backend rejected the instance".into(),
                    retryable: true,
                });
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(InstanceRecord {
                id,
                previous_id: request.previous_id,
                plugin_id,
                plugin_name: format!("plugin-{plugin_id}"),
                plugin_version: "1.0".into(),
                kind: InstanceKind::Ds,
                status: InstanceStatus::Created,
                start_date: Utc::now(),
                end_date: None,
            })
        }
    }

    fn piping(id: PipingId, previous: Option<PipingId>, plugin: &str) -> PipingRecord {
        PipingRecord {
            id,
            previous,
            plugin_name: plugin.into(),
            plugin_version: "1.0".into(),
            title: None,
        }
    }

    fn catalog(names: &[(&str, PluginId)]) -> PluginCatalog {
        names
            .iter()
            .map(|&(name, id)| Plugin {
                id,
                name: name.into(),
                version: "1.0".into(),
                fan_in: None,
            })
            .collect()
    }

    fn plan(pipings: Vec<PipingRecord>) -> ExecutionPlan {
        ExecutionPlan::compile(pipings, HashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn failure_free_chain_creates_every_piping() {
        let api = ScriptedApi::new();
        let catalog = catalog(&[("a", 10), ("b", 11), ("c", 12)]);
        let plan = plan(vec![
            piping(1, None, "a"),
            piping(2, Some(1), "b"),
            piping(3, Some(2), "c"),
        ]);

        let outcome = Sequencer::new(&api)
            .run(&plan, &catalog, 77, &Assignments::new())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.created.len(), 3);
        // The root attaches to the target instance, each later piping to
        // its dependency's created id.
        assert_eq!(outcome.created[0].previous_id, Some(77));
        assert_eq!(
            outcome.created[1].previous_id,
            Some(outcome.created[0].id)
        );
        assert_eq!(
            outcome.created[2].previous_id,
            Some(outcome.created[1].id)
        );
        assert_eq!(outcome.last_created().unwrap().id, outcome.created[2].id);
    }

    #[tokio::test]
    async fn failure_poisons_transitive_dependents_only() {
        // 1 -> 2(fails) -> 3, and 4 hangs off 1 independently.
        let api = ScriptedApi::failing([11]);
        let catalog = catalog(&[("a", 10), ("b", 11), ("c", 12), ("d", 13)]);
        let plan = plan(vec![
            piping(1, None, "a"),
            piping(2, Some(1), "b"),
            piping(3, Some(2), "c"),
            piping(4, Some(1), "d"),
        ]);

        let outcome = Sequencer::new(&api)
            .run(&plan, &catalog, 77, &Assignments::new())
            .await
            .unwrap();

        let created_plugins: Vec<_> =
            outcome.created.iter().map(|c| c.plugin_id).collect();
        assert_eq!(created_plugins, vec![10, 13]);

        assert_eq!(outcome.errors.len(), 2);
        assert!(matches!(
            outcome.errors[0],
            SequenceError::Creation { piping: 2, .. }
        ));
        assert!(matches!(
            outcome.errors[1],
            SequenceError::DependencyUnavailable {
                piping: 3,
                dependency: 2,
                ..
            }
        ));
        // Piping 3 never reached the backend.
        assert_eq!(api.call_count(), 3);
    }

    #[tokio::test]
    async fn deep_dependency_chains_skip_every_descendant() {
        // 1(fails) -> 2 -> 3 -> 4: one creation error, three skips.
        let api = ScriptedApi::failing([10]);
        let catalog = catalog(&[("a", 10), ("b", 11), ("c", 12), ("d", 13)]);
        let plan = plan(vec![
            piping(1, None, "a"),
            piping(2, Some(1), "b"),
            piping(3, Some(2), "c"),
            piping(4, Some(3), "d"),
        ]);

        let outcome = Sequencer::new(&api)
            .run(&plan, &catalog, 77, &Assignments::new())
            .await
            .unwrap();

        assert!(outcome.created.is_empty());
        assert_eq!(outcome.errors.len(), 4);
        assert_eq!(api.call_count(), 1);
        let skipped: Vec<_> = outcome.errors[1..]
            .iter()
            .map(SequenceError::piping)
            .collect();
        assert_eq!(skipped, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn every_root_piping_attaches_to_the_target() {
        let api = ScriptedApi::new();
        let catalog = catalog(&[("a", 10), ("b", 11)]);
        let plan = plan(vec![piping(1, None, "a"), piping(2, None, "b")]);

        let outcome = Sequencer::new(&api)
            .run(&plan, &catalog, 55, &Assignments::new())
            .await
            .unwrap();

        assert_eq!(outcome.created.len(), 2);
        assert!(outcome
            .created
            .iter()
            .all(|c| c.previous_id == Some(55)));
    }

    #[tokio::test]
    async fn default_parameters_and_compute_override_reach_the_payload() {
        let api = ScriptedApi::new();
        let catalog = catalog(&[("a", 10)]);
        let mut defaults = HashMap::new();
        defaults.insert(
            1,
            vec![ParameterValue::new("threshold", serde_json::json!(0.7))],
        );
        let plan =
            ExecutionPlan::compile(vec![piping(1, None, "a")], defaults).unwrap();

        let mut assignments = Assignments::new();
        assignments.insert(
            1,
            crate::compute::ComputeAssignment {
                candidates: vec![ComputeResource {
                    name: "gpu-cluster".into(),
                    description: String::new(),
                }],
                selected: Some("gpu-cluster".into()),
            },
        );

        Sequencer::new(&api)
            .run(&plan, &catalog, 77, &assignments)
            .await
            .unwrap();

        let calls = api.calls.lock().unwrap();
        let (plugin_id, ref request) = calls[0];
        assert_eq!(plugin_id, 10);
        assert_eq!(
            request.parameters.get("threshold"),
            Some(&serde_json::json!(0.7))
        );
        assert_eq!(
            request.compute_resource_name.as_deref(),
            Some("gpu-cluster")
        );
    }

    #[tokio::test]
    async fn unknown_plugin_is_a_creation_error_without_a_call() {
        let api = ScriptedApi::new();
        let catalog = catalog(&[("a", 10)]);
        let plan = plan(vec![
            piping(1, None, "a"),
            piping(2, Some(1), "missing"),
            piping(3, Some(2), "a"),
        ]);

        let outcome = Sequencer::new(&api)
            .run(&plan, &catalog, 77, &Assignments::new())
            .await
            .unwrap();

        assert_eq!(outcome.created.len(), 1);
        assert_eq!(api.call_count(), 1);
        assert!(matches!(
            outcome.errors[0],
            SequenceError::Creation { piping: 2, .. }
        ));
        assert!(matches!(
            outcome.errors[1],
            SequenceError::DependencyUnavailable { piping: 3, .. }
        ));
    }

    #[tokio::test]
    async fn out_of_order_plan_is_a_structural_error() {
        let api = ScriptedApi::new();
        let catalog = catalog(&[("a", 10), ("b", 11)]);
        // Bypass compile() to simulate a caller breaking the guarantee.
        let plan = ExecutionPlan::from_ordered(
            vec![piping(2, Some(1), "b"), piping(1, None, "a")],
            HashMap::new(),
        );

        let err = Sequencer::new(&api)
            .run(&plan, &catalog, 77, &Assignments::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PlanOrder { piping: 2 }));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn reruns_create_fresh_instances() {
        let api = ScriptedApi::new();
        let catalog = catalog(&[("a", 10)]);
        let plan = plan(vec![piping(1, None, "a")]);
        let sequencer = Sequencer::new(&api);

        let first = sequencer
            .run(&plan, &catalog, 77, &Assignments::new())
            .await
            .unwrap();
        let second = sequencer
            .run(&plan, &catalog, 77, &Assignments::new())
            .await
            .unwrap();

        assert_ne!(first.created[0].id, second.created[0].id);
    }
}
