//! Dependency resolution for features
//!
//! Ordering is pass-wise: every pass collects the features whose in-set
//! dependencies are already placed, sorts that pass by priority and then by
//! input position, and appends it. Features left over after the last pass
//! either sit on a cycle or depend on one.

use foreman_core::{Feature, ForemanError};
use std::collections::{HashMap, HashSet};

/// Outcome of ordering a feature set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Feature ids in execution order
    pub order: Vec<String>,
    /// One group per strongly connected component, members in input order
    pub cycles: Vec<Vec<String>>,
    /// Features excluded because something they need is on a cycle
    pub blocked_by_cycle: Vec<String>,
}

impl Resolution {
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// One `CycleDetected` per cycle group
    pub fn cycle_errors(&self) -> Vec<ForemanError> {
        self.cycles
            .iter()
            .map(|group| ForemanError::CycleDetected(group.clone()))
            .collect()
    }

    /// Whether `id` can never run until a cycle is broken
    pub fn is_excluded(&self, id: &str) -> bool {
        self.cycles.iter().flatten().any(|c| c == id) || self.blocked_by_cycle.iter().any(|b| b == id)
    }
}

/// Order `features` by dependencies, then priority, then input position
///
/// Dependencies on ids outside `features` are ignored here; whether they
/// block is decided by [`blocking_dependencies`]. Duplicate ids keep their
/// first occurrence.
pub fn resolve(features: &[Feature]) -> Resolution {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut nodes: Vec<&Feature> = Vec::new();
    for feature in features {
        if !index.contains_key(feature.id.as_str()) {
            index.insert(feature.id.as_str(), nodes.len());
            nodes.push(feature);
        }
    }

    let n = nodes.len();
    // deps[i]: in-set dependencies of i; dependents[j]: nodes that wait on j
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, feature) in nodes.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in &feature.dependencies {
            if let Some(&j) = index.get(dep.as_str()) {
                if seen.insert(j) {
                    deps[i].push(j);
                    dependents[j].push(i);
                }
            }
        }
    }

    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);

    let mut pass: Vec<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    while !pass.is_empty() {
        pass.sort_by_key(|&i| (nodes[i].effective_priority(), i));

        let mut next = Vec::new();
        for &i in &pass {
            placed[i] = true;
            order.push(nodes[i].id.clone());
            for &d in &dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    next.push(d);
                }
            }
        }
        pass = next;
    }

    let leftovers: Vec<usize> = (0..n).filter(|&i| !placed[i]).collect();
    if leftovers.is_empty() {
        return Resolution {
            order,
            ..Default::default()
        };
    }

    let components = strongly_connected(&leftovers, &deps, &placed);
    let mut on_cycle = vec![false; n];
    let mut cycles = Vec::new();
    for mut component in components {
        let cyclic = component.len() > 1 || deps[component[0]].contains(&component[0]);
        if !cyclic {
            continue;
        }
        component.sort_unstable();
        for &i in &component {
            on_cycle[i] = true;
        }
        cycles.push(component);
    }
    cycles.sort_by_key(|c| c[0]);

    let cycles = cycles
        .into_iter()
        .map(|c| c.into_iter().map(|i| nodes[i].id.clone()).collect())
        .collect();
    let blocked_by_cycle = leftovers
        .into_iter()
        .filter(|&i| !on_cycle[i])
        .map(|i| nodes[i].id.clone())
        .collect();

    Resolution {
        order,
        cycles,
        blocked_by_cycle,
    }
}

/// Tarjan's algorithm restricted to the unplaced nodes
///
/// Iterative, so long dependency chains cannot exhaust the stack.
fn strongly_connected(nodes: &[usize], deps: &[Vec<usize>], placed: &[bool]) -> Vec<Vec<usize>> {
    struct Tarjan {
        counter: usize,
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
    }

    impl Tarjan {
        fn enter(&mut self, v: usize) {
            self.index[v] = Some(self.counter);
            self.low[v] = self.counter;
            self.counter += 1;
            self.stack.push(v);
            self.on_stack[v] = true;
        }
    }

    let n = deps.len();
    let mut t = Tarjan {
        counter: 0,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
    };
    let mut components = Vec::new();
    // (node, next dependency to examine)
    let mut work: Vec<(usize, usize)> = Vec::new();

    for &root in nodes {
        if t.index[root].is_some() {
            continue;
        }
        t.enter(root);
        work.push((root, 0));

        while let Some(frame) = work.last_mut() {
            let v = frame.0;
            if let Some(&w) = deps[v].get(frame.1) {
                frame.1 += 1;
                if placed[w] {
                    continue;
                }
                match t.index[w] {
                    None => {
                        t.enter(w);
                        work.push((w, 0));
                    }
                    Some(iw) if t.on_stack[w] => t.low[v] = t.low[v].min(iw),
                    Some(_) => {}
                }
                continue;
            }

            work.pop();
            if Some(t.low[v]) == t.index[v] {
                let mut component = Vec::new();
                while let Some(w) = t.stack.pop() {
                    t.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
            if let Some(&(parent, _)) = work.last() {
                t.low[parent] = t.low[parent].min(t.low[v]);
            }
        }
    }
    components
}

/// Dependencies of `feature` that are not yet `completed`/`verified`
///
/// Ids missing from `all` (archived, deleted) do not block.
pub fn blocking_dependencies(feature: &Feature, all: &[Feature]) -> Vec<String> {
    let status: HashMap<&str, &Feature> = all.iter().map(|f| (f.id.as_str(), f)).collect();

    let mut blocking = Vec::new();
    for dep in &feature.dependencies {
        if let Some(found) = status.get(dep.as_str()) {
            if !found.status.is_terminal_success() && !blocking.contains(dep) {
                blocking.push(dep.clone());
            }
        }
    }
    blocking
}

/// Runnable, unblocked features of `features` in resolver order
///
/// `all` is the whole project, so dependencies outside the candidate set
/// (other workspaces) are still honored.
pub fn eligible_candidates<'a>(features: &'a [Feature], all: &[Feature]) -> Vec<&'a Feature> {
    let resolution = resolve(features);
    let by_id: HashMap<&str, &Feature> = features.iter().map(|f| (f.id.as_str(), f)).collect();

    resolution
        .order
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).copied())
        .filter(|f| f.status.is_runnable())
        .filter(|f| blocking_dependencies(f, all).is_empty())
        .collect()
}
