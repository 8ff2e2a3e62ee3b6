//! Deadlock detector (component C5).
//!
//! Maintains a wait-for graph (`waiter -> holder` edges) fed by the
//! transaction manager whenever a lock acquisition blocks, and looks for
//! cycles using iterative DFS with three-color marking so recursion depth
//! is bounded by an explicit stack rather than the call stack (§4.5). Runs
//! in one of two modes: timeout-only (the lock manager's own deadline is
//! the only defense) or periodic (a background task calls `detect_cycles`
//! on a fixed cadence, default 50ms, and aborts the chosen victim).
//!
//! No direct teacher analog: the teacher's OCC design has no lock waiters
//! and therefore no wait-for graph. Grounded instead on the general
//! graph-traversal idiom used elsewhere in the teacher (iterative,
//! explicit-stack traversal over recursion to bound worst-case depth, as
//! seen in its key-prefix scans over `BTreeSet`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use mantis_core::TxId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Per-transaction bookkeeping the detector needs to score a deadlock
/// victim: how many locks it holds and when it began.
#[derive(Debug, Clone, Copy)]
pub struct TxCost {
    pub locks_held: usize,
    pub began_at: Instant,
}

/// Wait-for graph over transaction IDs: an edge `a -> b` means `a` is
/// blocked waiting on a lock `b` holds.
pub struct DeadlockDetector {
    edges: Mutex<HashMap<TxId, Vec<TxId>>>,
    costs: Mutex<HashMap<TxId, TxCost>>,
    /// Periodic detection interval; `None` means timeout-only mode.
    periodic_interval: Option<Duration>,
}

impl DeadlockDetector {
    /// A detector in timeout-only mode: no proactive cycle scan, lock
    /// waiters rely solely on their own deadline.
    pub fn timeout_only() -> Self {
        DeadlockDetector {
            edges: Mutex::new(HashMap::new()),
            costs: Mutex::new(HashMap::new()),
            periodic_interval: None,
        }
    }

    /// A detector that proactively scans for cycles every `interval`.
    pub fn periodic(interval: Duration) -> Self {
        DeadlockDetector {
            edges: Mutex::new(HashMap::new()),
            costs: Mutex::new(HashMap::new()),
            periodic_interval: Some(interval),
        }
    }

    /// Whether this detector runs a background periodic scan.
    pub fn is_periodic(&self) -> bool {
        self.periodic_interval.is_some()
    }

    /// The configured periodic interval, if any.
    pub fn periodic_interval(&self) -> Option<Duration> {
        self.periodic_interval
    }

    /// Record that `waiter` is now blocked waiting on a lock held by each
    /// of `holders`.
    pub fn add_wait(&self, waiter: TxId, holders: &[TxId]) {
        let mut edges = self.edges.lock();
        let list = edges.entry(waiter).or_default();
        for &holder in holders {
            if holder != waiter && !list.contains(&holder) {
                list.push(holder);
            }
        }
    }

    /// Remove every edge originating from `tx_id` (it either acquired the
    /// lock or gave up waiting).
    pub fn remove_waiter(&self, tx_id: TxId) {
        self.edges.lock().remove(&tx_id);
    }

    /// Update the cost bookkeeping used for victim selection.
    pub fn set_cost(&self, tx_id: TxId, locks_held: usize, began_at: Instant) {
        self.costs.lock().insert(tx_id, TxCost { locks_held, began_at });
    }

    /// Drop cost bookkeeping for a finished transaction.
    pub fn clear_cost(&self, tx_id: TxId) {
        self.costs.lock().remove(&tx_id);
    }

    /// Find every cycle in the wait-for graph, returning the chosen
    /// victim transaction per cycle (lowest cost, tie-break highest
    /// TxID, per §4.5).
    pub fn detect_cycles(&self) -> Vec<TxId> {
        let edges = self.edges.lock();
        let costs = self.costs.lock();
        let nodes: Vec<TxId> = edges.keys().copied().collect();
        let mut colors: HashMap<TxId, Color> = nodes.iter().map(|&n| (n, Color::White)).collect();
        let mut victims = Vec::new();
        let mut seen_cycle_members: std::collections::HashSet<TxId> = std::collections::HashSet::new();

        for &start in &nodes {
            if colors.get(&start) != Some(&Color::White) {
                continue;
            }
            if let Some(cycle) = find_cycle_from(&edges, &mut colors, start) {
                if cycle.iter().any(|tx| seen_cycle_members.contains(tx)) {
                    continue;
                }
                seen_cycle_members.extend(cycle.iter().copied());
                if let Some(victim) = select_victim(&cycle, &costs) {
                    victims.push(victim);
                }
            }
        }
        victims
    }
}

/// Iterative DFS with explicit stack and three-color marking: White =
/// unvisited, Gray = on the current path, Black = fully explored with no
/// cycle found through it. A back-edge to a Gray node closes a cycle.
fn find_cycle_from(
    edges: &HashMap<TxId, Vec<TxId>>,
    colors: &mut HashMap<TxId, Color>,
    start: TxId,
) -> Option<Vec<TxId>> {
    let mut path: Vec<TxId> = Vec::new();
    // (node, next child index to visit)
    let mut stack: Vec<(TxId, usize)> = vec![(start, 0)];
    colors.insert(start, Color::Gray);
    path.push(start);

    while !stack.is_empty() {
        let (node, idx) = *stack.last().unwrap();
        let children = edges.get(&node).map(|v| v.as_slice()).unwrap_or(&[]);
        if idx < children.len() {
            let child = children[idx];
            stack.last_mut().unwrap().1 += 1;
            match colors.get(&child).copied().unwrap_or(Color::White) {
                Color::White => {
                    colors.insert(child, Color::Gray);
                    path.push(child);
                    stack.push((child, 0));
                }
                Color::Gray => {
                    // Back-edge: extract the cycle starting at `child`'s
                    // position on the current path.
                    let start_pos = path.iter().position(|&n| n == child).unwrap();
                    let cycle = path[start_pos..].to_vec();
                    // Mark the whole path explored before returning so the
                    // outer loop doesn't re-walk it from another start node.
                    for &n in &path {
                        colors.insert(n, Color::Black);
                    }
                    return Some(cycle);
                }
                Color::Black => {}
            }
        } else {
            stack.pop();
            path.pop();
            colors.insert(node, Color::Black);
        }
    }
    None
}

fn select_victim(cycle: &[TxId], costs: &HashMap<TxId, TxCost>) -> Option<TxId> {
    cycle
        .iter()
        .copied()
        .min_by(|&a, &b| {
            let cost = |tx: TxId| -> (u64, std::cmp::Reverse<u64>) {
                match costs.get(&tx) {
                    Some(c) => (
                        (c.locks_held as u64) * c.began_at.elapsed().as_millis().max(1) as u64,
                        std::cmp::Reverse(tx.as_u64()),
                    ),
                    None => (0, std::cmp::Reverse(tx.as_u64())),
                }
            };
            cost(a).cmp(&cost(b)).then_with(|| b.cmp(&a))
        })
}
