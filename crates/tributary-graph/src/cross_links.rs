use std::collections::HashMap;

use tributary_types::{InstanceId, InstanceRecord, ParameterValue, PluginCatalog};

// ---------------------------------------------------------------------------
// CrossEdge / CrossLinks
// ---------------------------------------------------------------------------

/// An extra dependency edge from an ancestor instance to a fan-in consumer.
/// Lives alongside the instance tree, never inside its child lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossEdge {
    pub ancestor: InstanceId,
    pub descendant: InstanceId,
}

/// The fan-in edges resolved for one feed.
#[derive(Debug, Clone, Default)]
pub struct CrossLinks {
    edges: Vec<CrossEdge>,
    by_descendant: HashMap<InstanceId, Vec<InstanceId>>,
}

impl CrossLinks {
    fn push(&mut self, ancestor: InstanceId, descendant: InstanceId) {
        self.edges.push(CrossEdge {
            ancestor,
            descendant,
        });
        self.by_descendant
            .entry(descendant)
            .or_default()
            .push(ancestor);
    }

    /// All edges, in the order the fan-in parameters declared them.
    pub fn edges(&self) -> &[CrossEdge] {
        &self.edges
    }

    /// The declared ancestor list of a fan-in instance, in parameter order.
    pub fn ancestors_of(&self, descendant: InstanceId) -> &[InstanceId] {
        self.by_descendant
            .get(&descendant)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Derive fan-in dependency edges for every instance whose catalog entry
/// declares the capability.
///
/// `values` maps instance id to its fetched parameter values. The declared
/// parameter carries an ordered, comma-separated ancestor id list; a plain
/// numeric value is accepted as a single-ancestor list. Instances without
/// the capability, or without the parameter, contribute nothing. Malformed
/// id tokens are logged and skipped, never guessed at.
pub fn resolve_cross_links(
    records: &[InstanceRecord],
    catalog: &PluginCatalog,
    values: &HashMap<InstanceId, Vec<ParameterValue>>,
) -> CrossLinks {
    let mut links = CrossLinks::default();

    for record in records {
        let fan_in = match catalog.get(record.plugin_id).and_then(|p| p.fan_in.as_ref()) {
            Some(capability) => capability,
            None => continue,
        };
        let value = match values
            .get(&record.id)
            .and_then(|vals| vals.iter().find(|v| v.name == fan_in.parameter))
        {
            Some(v) => &v.value,
            None => continue,
        };

        if let Some(ancestor) = value.as_u64() {
            links.push(ancestor, record.id);
            continue;
        }
        let raw = match value.as_str() {
            Some(s) => s,
            None => continue,
        };
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.parse::<InstanceId>() {
                Ok(ancestor) => links.push(ancestor, record.id),
                Err(_) => tracing::warn!(
                    instance = record.id,
                    parameter = %fan_in.parameter,
                    %token,
                    "skipping malformed ancestor id in fan-in parameter"
                ),
            }
        }
    }

    links
}
