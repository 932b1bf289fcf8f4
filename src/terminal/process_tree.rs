//! Process-tree discovery.
//!
//! The OS process table is read once, turned into a parent→children
//! adjacency map, and walked breadth-first from a root set. The `ps`-based
//! implementation is inherently racy (processes come and go between the
//! snapshot and the signal) and callers must tolerate vanished PIDs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::process::Command;

use crate::{AppError, Result};

/// Capability to enumerate a process subtree.
pub trait ProcessTree: Send + Sync {
    /// Every PID in the subtrees rooted at `roots`, roots included.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Terminal` if the process table cannot be read.
    fn descendants(&self, roots: &[u32]) -> Result<Vec<u32>>;
}

/// [`ProcessTree`] backed by one `ps -A -o pid= -o ppid=` snapshot per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsProcessTree;

impl ProcessTree for PsProcessTree {
    fn descendants(&self, roots: &[u32]) -> Result<Vec<u32>> {
        let output = Command::new("ps")
            .args(["-A", "-o", "pid=", "-o", "ppid="])
            .output()
            .map_err(|err| AppError::Terminal(format!("failed to run ps: {err}")))?;
        if !output.status.success() {
            return Err(AppError::Terminal(format!(
                "ps exited with {}",
                output.status
            )));
        }

        let table = parse_process_table(&String::from_utf8_lossy(&output.stdout));
        Ok(collect_descendants(&table, roots))
    }
}

/// Parse `pid ppid` rows into a parent→children map.
///
/// Rows that do not hold exactly two unsigned integers are skipped.
#[must_use]
pub fn parse_process_table(text: &str) -> HashMap<u32, Vec<u32>> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let (Some(pid), Some(ppid), None) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        let (Ok(pid), Ok(ppid)) = (pid.parse::<u32>(), ppid.parse::<u32>()) else {
            continue;
        };
        if pid == ppid {
            continue;
        }
        children.entry(ppid).or_default().push(pid);
    }
    children
}

/// Breadth-first transitive closure of `roots` over `children`.
///
/// Roots come first, then each generation in table order. Cycles and
/// duplicate roots are visited once.
#[must_use]
pub fn collect_descendants(children: &HashMap<u32, Vec<u32>>, roots: &[u32]) -> Vec<u32> {
    let mut seen: HashSet<u32> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<u32> = VecDeque::new();

    for &root in roots {
        if seen.insert(root) {
            queue.push_back(root);
        }
    }

    while let Some(pid) = queue.pop_front() {
        order.push(pid);
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                if seen.insert(kid) {
                    queue.push_back(kid);
                }
            }
        }
    }

    order
}
