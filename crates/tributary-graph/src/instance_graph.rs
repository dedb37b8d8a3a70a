use std::collections::HashMap;

use tributary_types::{Error, InstanceId, InstanceRecord, Result};

// ---------------------------------------------------------------------------
// InstanceNode
// ---------------------------------------------------------------------------

/// One node of the reconstructed instance forest. Children keep the order
/// their records appeared in the input listing.
#[derive(Debug, Clone)]
pub struct InstanceNode {
    pub record: InstanceRecord,
    pub children: Vec<InstanceNode>,
    pub depth: usize,
}

impl InstanceNode {
    /// Depth-first lookup within this subtree.
    pub fn find(&self, id: InstanceId) -> Option<&InstanceNode> {
        if self.record.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Number of nodes in this subtree, including self.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(InstanceNode::size).sum::<usize>()
    }
}

/// Total node count across a forest.
pub fn forest_size(forest: &[InstanceNode]) -> usize {
    forest.iter().map(InstanceNode::size).sum()
}

// ---------------------------------------------------------------------------
// Forest construction
// ---------------------------------------------------------------------------

/// Reconstruct the instance forest from a flat record listing.
///
/// Pass 1 indexes records by id; pass 2 resolves every `previous_id`
/// against that index. A record whose `previous_id` is absent from the
/// input set becomes a root rather than being dropped — a paginated fetch
/// legitimately sees subtrees whose parents live on another page.
///
/// Duplicate ids, self-referential pointers, and previous-pointer cycles
/// are precondition violations and fail with a structural error.
pub fn build_forest(records: &[InstanceRecord]) -> Result<Vec<InstanceNode>> {
    let mut index: HashMap<InstanceId, usize> = HashMap::with_capacity(records.len());
    for (pos, record) in records.iter().enumerate() {
        if index.insert(record.id, pos).is_some() {
            return Err(Error::DuplicateInstance { id: record.id });
        }
    }

    let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut roots: Vec<usize> = Vec::new();
    for (pos, record) in records.iter().enumerate() {
        match record.previous_id {
            Some(prev) if prev == record.id => {
                return Err(Error::SelfReference { id: record.id });
            }
            Some(prev) => match index.get(&prev) {
                Some(&parent) => children_of[parent].push(pos),
                None => roots.push(pos),
            },
            None => roots.push(pos),
        }
    }

    let mut assembled = 0usize;
    let forest = roots
        .iter()
        .map(|&root| assemble(records, &children_of, root, 0, &mut assembled))
        .collect();

    // Cycle members are reachable from no root; the count exposes them.
    if assembled != records.len() {
        return Err(Error::CyclicChain {
            remaining: records.len() - assembled,
        });
    }
    Ok(forest)
}

fn assemble(
    records: &[InstanceRecord],
    children_of: &[Vec<usize>],
    pos: usize,
    depth: usize,
    assembled: &mut usize,
) -> InstanceNode {
    *assembled += 1;
    InstanceNode {
        record: records[pos].clone(),
        children: children_of[pos]
            .iter()
            .map(|&child| assemble(records, children_of, child, depth + 1, assembled))
            .collect(),
        depth,
    }
}
