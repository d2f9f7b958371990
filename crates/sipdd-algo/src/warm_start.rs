//! Starting solutions and inherited bounds handed to each scenario solve.
//!
//! Before every solver call the manager assembles the candidate list for the
//! configured [`WarmStartMode`], repairs candidates that the node's new
//! tightening would make infeasible, decides whether an objective lower
//! bound can be inherited from the father, and switches the solver's start
//! value control accordingly.

use sipdd_core::{BoundingStep, NodeArena, NodeId, WarmStartMode};
use sipdd_solver_common::{SolverError, StartCandidate, StartSource, SubproblemSolver};

use crate::arena::ScratchArena;
use crate::context::EvalContext;
use crate::error::EvalResult;

/// Inputs prepared for one scenario solve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmStart {
    pub candidates: Vec<StartCandidate>,
    /// Inherited lower bound on the scenario objective.
    pub objective_lower_bound: Option<f64>,
    /// Value passed to [`SubproblemSolver::set_use_start_values`].
    pub use_starts: bool,
}

/// Bounded candidate list with exact-duplicate suppression.
///
/// The first `capacity` distinct candidates are appended. Further ones
/// overwrite the list from the front, at most `overflow` times; anything
/// beyond that is dropped.
struct CandidateList<'a> {
    items: Vec<StartCandidate>,
    seen: hashbrown::HashSet<Vec<u64>, hashbrown::DefaultHashBuilder, &'a bumpalo::Bump>,
    capacity: usize,
    overflow: usize,
    overwritten: usize,
    dropped: usize,
}

impl<'a> CandidateList<'a> {
    fn new(scratch: &'a ScratchArena, n_scenarios: usize) -> Self {
        Self {
            items: Vec::new(),
            seen: scratch.alloc_hashset(),
            capacity: 2 * n_scenarios,
            overflow: n_scenarios,
            overwritten: 0,
            dropped: 0,
        }
    }

    fn offer(&mut self, source: StartSource, values: Vec<f64>) {
        // -0.0 and 0.0 are the same start
        let key: Vec<u64> = values.iter().map(|v| (v + 0.0).to_bits()).collect();
        if !self.seen.insert(key) {
            return;
        }
        let candidate = StartCandidate { source, values };
        if self.items.len() < self.capacity {
            self.items.push(candidate);
        } else if self.overwritten < self.overflow {
            self.items[self.overwritten] = candidate;
            self.overwritten += 1;
        } else {
            self.dropped += 1;
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn into_items(self) -> Vec<StartCandidate> {
        if self.dropped > 0 {
            tracing::warn!(
                dropped = self.dropped,
                capacity = self.capacity + self.overflow,
                "warm start candidate list full"
            );
        }
        self.items
    }
}

/// Assemble the warm start for the scenario at `position` of the bounding
/// order and apply the start-value control to `solver`.
///
/// Father candidates that the node's new tightening puts out of range are
/// clamped into it rather than dropped.
pub fn prepare<S: SubproblemSolver + ?Sized>(
    ctx: &EvalContext,
    scratch: &ScratchArena,
    nodes: &NodeArena,
    node_id: NodeId,
    position: usize,
    solver: &mut S,
) -> EvalResult<WarmStart> {
    let node = &nodes[node_id];
    let scenario = ctx.order.scenario(position);
    let mode = ctx.config.bounding.warm_start;
    let mut list = CandidateList::new(scratch, ctx.n_scenarios());
    let mut use_starts = mode.is_enabled();

    if node.step == BoundingStep::Dual && ctx.dual.iteration > 0 {
        if let Some(values) = &ctx.dual.integer_starts[scenario] {
            list.offer(StartSource::PreviousIteration, values.clone());
        }
        if let Some(values) = ctx
            .dual
            .most_frequent
            .and_then(|h| ctx.dual.integer_starts[h].as_ref())
        {
            list.offer(StartSource::MostFrequent, values.clone());
        }
        use_starts = true;
    } else {
        match mode {
            WarmStartMode::Off | WarmStartMode::Advanced => {}
            WarmStartMode::Father => {
                if let Some(father) = node.father {
                    if let Some(values) = &nodes[father].scenarios[scenario].integer_start {
                        let rule = Repair::for_node(ctx, nodes, node_id, solver)?;
                        list.offer(StartSource::Father, Repair::apply(rule, values.clone())?);
                    }
                }
            }
            WarmStartMode::FatherAndSiblings | WarmStartMode::FatherAndSiblingsWithBound => {
                if let Some(father) = node.father {
                    let starts = nodes[father].scenarios.iter().filter_map(|s| s.integer_start.as_ref());
                    if starts.clone().next().is_some() {
                        let rule = Repair::for_node(ctx, nodes, node_id, solver)?;
                        for values in starts {
                            list.offer(StartSource::Father, Repair::apply(rule, values.clone())?);
                        }
                    }
                }
                for &earlier in &ctx.order.as_slice()[..position] {
                    let slot = &node.scenarios[earlier];
                    if slot.inherited || !slot.solved {
                        continue;
                    }
                    if let Some(values) = &slot.integer_start {
                        list.offer(StartSource::Sibling, values.clone());
                    }
                }
            }
            WarmStartMode::PreviousScenario | WarmStartMode::PreviousScenarioWithBound => {
                if position > 0 {
                    let previous = ctx.order.scenario(position - 1);
                    if let Some(values) = &node.scenarios[previous].integer_start {
                        list.offer(StartSource::PreviousScenario, values.clone());
                    }
                }
            }
        }
    }

    let objective_lower_bound = inherited_bound(ctx, nodes, node_id, scenario);

    tracing::trace!(
        node = %node_id,
        scenario,
        candidates = list.len(),
        use_starts,
        "warm start prepared"
    );
    solver.set_use_start_values(use_starts)?;

    Ok(WarmStart {
        candidates: list.into_items(),
        objective_lower_bound,
        use_starts,
    })
}

/// Clamp of the node's tightened discrete variable, applied to father
/// candidates before they are deduplicated.
#[derive(Debug, Clone, Copy)]
struct Repair {
    var: usize,
    position: usize,
    lower: f64,
    upper: f64,
}

impl Repair {
    fn for_node<S: SubproblemSolver + ?Sized>(
        ctx: &EvalContext,
        nodes: &NodeArena,
        node_id: NodeId,
        solver: &S,
    ) -> EvalResult<Option<Self>> {
        let Some(t) = nodes[node_id].tightening else {
            return Ok(None);
        };
        if !ctx.model.kind(t.var).is_discrete() {
            return Ok(None);
        }
        let position = solver
            .integer_position(t.var)
            .ok_or(SolverError::Layout(t.var))?;
        Ok(Some(Self {
            var: t.var,
            position,
            lower: t.lower,
            upper: t.upper,
        }))
    }

    fn apply(rule: Option<Self>, mut values: Vec<f64>) -> EvalResult<Vec<f64>> {
        let Some(rule) = rule else {
            return Ok(values);
        };
        let Some(v) = values.get_mut(rule.position) else {
            return Err(SolverError::Layout(rule.var).into());
        };
        if *v < rule.lower {
            *v = rule.lower;
        } else if *v > rule.upper {
            *v = rule.upper;
        }
        Ok(values)
    }
}

/// Father's scenario bound, when the mode allows inheriting it.
///
/// Under dual bounding the scenario objectives carry a Lagrangian term that
/// changes with the multipliers, in the primal pass as well, so the father's
/// value is no bound for them.
fn inherited_bound(ctx: &EvalContext, nodes: &NodeArena, node_id: NodeId, scenario: usize) -> Option<f64> {
    let node = &nodes[node_id];
    if !ctx.config.bounding.warm_start.inherits_bound()
        || node.is_root()
        || ctx.config.risk.is_active()
        || ctx.config.dual.enabled
    {
        return None;
    }
    let bound = node.scenarios[scenario].bound;
    bound.is_finite().then_some(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_list_dedup_and_overflow() {
        let scratch = ScratchArena::new();
        let mut list = CandidateList::new(&scratch, 1);
        list.offer(StartSource::Father, vec![1.0]);
        list.offer(StartSource::Sibling, vec![1.0]);
        list.offer(StartSource::Father, vec![2.0]);
        assert_eq!(list.len(), 2);
        // full: overwrite the front once, then drop
        list.offer(StartSource::Father, vec![3.0]);
        list.offer(StartSource::Father, vec![4.0]);
        let items = list.into_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].values, vec![3.0]);
        assert_eq!(items[1].values, vec![2.0]);
    }

    #[test]
    fn test_repair_clamps_into_range() {
        let rule = Some(Repair {
            var: 0,
            position: 1,
            lower: 2.0,
            upper: 4.0,
        });
        assert_eq!(Repair::apply(rule, vec![7.0, 9.0]).unwrap(), vec![7.0, 4.0]);
        assert_eq!(Repair::apply(rule, vec![7.0, 0.0]).unwrap(), vec![7.0, 2.0]);
        assert_eq!(Repair::apply(None, vec![9.0]).unwrap(), vec![9.0]);
        assert!(Repair::apply(rule, vec![1.0]).is_err());
    }

    #[test]
    fn test_negative_zero_is_duplicate() {
        let scratch = ScratchArena::new();
        let mut list = CandidateList::new(&scratch, 2);
        list.offer(StartSource::Father, vec![0.0, 1.0]);
        list.offer(StartSource::Father, vec![-0.0, 1.0]);
        assert_eq!(list.len(), 1);
    }
}
