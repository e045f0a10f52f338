//! Installation order for a batch of repositories
//!
//! Repositories flagged `prior_installation_required` must be installed
//! before their dependents. Edges pointing outside the batch are ignored.
//! A cycle does not stop ordering: each member is placed exactly once, in
//! whatever order it is first reached, so one member of a cycle may end up
//! ahead of a prerequisite it needs.

use crate::core::model::repository_id;
use crate::repository::catalog::RepoInfoDict;

/// Node state for the depth-first placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Unprocessed,
    /// On the stack; reaching it again means a cycle.
    Processing,
    Processed,
}

/// The batch, reordered. The three lists stay index-aligned.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderedComponents {
    pub ids: Vec<String>,
    pub repo_info_dicts: Vec<RepoInfoDict>,
    pub tool_panel_section_keys: Vec<Option<String>>,
}

/// For each batch member, the indices of batch members that must be
/// installed first.
pub fn prior_install_required(ids: &[String], repo_info_dicts: &[RepoInfoDict]) -> Vec<Vec<usize>> {
    ids.iter()
        .enumerate()
        .map(|(index, _)| {
            let mut required = Vec::new();
            let Some(infos) = repo_info_dicts.get(index) else {
                return required;
            };
            for edge in infos
                .values()
                .flat_map(|info| info.repository_dependency_edges())
                .filter(|edge| edge.must_install_first())
            {
                let edge_id = repository_id(&edge.tool_shed, &edge.name, &edge.owner, &edge.changeset_revision);
                if let Some(position) = ids.iter().position(|id| *id == edge_id)
                    && position != index
                    && !required.contains(&position)
                {
                    required.push(position);
                }
            }
            required
        })
        .collect()
}

/// Pick the next batch member to place: the first unplaced one with no
/// prerequisites, else the first whose prerequisites are all placed, else
/// the first unplaced one.
fn next_entry(requires: &[Vec<usize>], state: &[NodeState]) -> Option<usize> {
    let unplaced: Vec<usize> = (0..requires.len())
        .filter(|&i| state[i] != NodeState::Processed)
        .collect();
    unplaced
        .iter()
        .copied()
        .find(|&i| requires[i].is_empty())
        .or_else(|| {
            unplaced
                .iter()
                .copied()
                .find(|&i| requires[i].iter().all(|&r| state[r] == NodeState::Processed))
        })
        .or_else(|| unplaced.first().copied())
}

/// Order `ids` so prerequisites come first.
///
/// `repo_info_dicts` and `tool_panel_section_keys` are index-aligned with
/// `ids` and are permuted along with them.
pub fn order_components_for_installation(
    ids: &[String],
    repo_info_dicts: &[RepoInfoDict],
    tool_panel_section_keys: &[Option<String>],
) -> OrderedComponents {
    let requires = prior_install_required(ids, repo_info_dicts);
    let mut state = vec![NodeState::Unprocessed; ids.len()];
    let mut order: Vec<usize> = Vec::with_capacity(ids.len());

    while let Some(start) = next_entry(&requires, &state) {
        place(start, &requires, &mut state, &mut order);
    }

    OrderedComponents {
        ids: order.iter().map(|&i| ids[i].clone()).collect(),
        repo_info_dicts: order
            .iter()
            .map(|&i| repo_info_dicts.get(i).cloned().unwrap_or_default())
            .collect(),
        tool_panel_section_keys: order
            .iter()
            .map(|&i| tool_panel_section_keys.get(i).cloned().flatten())
            .collect(),
    }
}

/// Iterative DFS: emit `start` after its unplaced prerequisites. A
/// prerequisite already on the stack is skipped rather than reported.
fn place(start: usize, requires: &[Vec<usize>], state: &mut [NodeState], order: &mut Vec<usize>) {
    // (node, index of next prerequisite to visit)
    let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

    while let Some((node, child_idx)) = stack.pop() {
        match state[node] {
            NodeState::Processed => continue,
            NodeState::Processing => {}
            NodeState::Unprocessed => state[node] = NodeState::Processing,
        }

        let deps = &requires[node];
        let next = (child_idx..deps.len()).find(|&i| state[deps[i]] == NodeState::Unprocessed);
        match next {
            Some(i) => {
                stack.push((node, i + 1));
                stack.push((deps[i], 0));
            }
            None => {
                state[node] = NodeState::Processed;
                order.push(node);
            }
        }
    }
}
