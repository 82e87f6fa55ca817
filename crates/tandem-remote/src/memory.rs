//! In-process tree store.
//!
//! Implements [`RemoteStore`] over a single JSON document behind a mutex.
//! Every primitive runs under the lock, so updates and transactions are
//! atomic and subscribers always see consistent snapshots.  Faults can be
//! injected per path prefix to simulate network loss.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::path::{related, segments};
use crate::subscription::Subscription;
use crate::tree::{RemoteStore, TxDecision, TxFn, TxOutcome};

/// Primitive a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Read,
    Write,
    Transaction,
}

#[derive(Debug)]
struct Fault {
    op: FaultOp,
    prefix: Vec<String>,
    /// `None` fails forever.
    remaining: Option<usize>,
}

struct Watcher {
    path: Vec<String>,
    last: Option<Value>,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

#[derive(Default)]
struct TreeState {
    root: Value,
    watchers: Vec<Watcher>,
    faults: Vec<Fault>,
}

#[derive(Default)]
pub struct MemoryTree {
    state: Mutex<TreeState>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: Value) -> Self {
        Self {
            state: Mutex::new(TreeState {
                root,
                ..Default::default()
            }),
        }
    }

    /// Fail the next `times` calls of `op` under `prefix`.
    pub fn fail_next(&self, op: FaultOp, prefix: &str, times: usize) {
        self.add_fault(op, prefix, Some(times));
    }

    /// Fail every call of `op` under `prefix` until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, op: FaultOp, prefix: &str) {
        self.add_fault(op, prefix, None);
    }

    pub fn clear_faults(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.clear();
        }
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.state
            .lock()
            .map(|s| s.root.clone())
            .unwrap_or(Value::Null)
    }

    /// Number of live subscribers, for diagnostics.
    pub fn watcher_count(&self) -> usize {
        self.state
            .lock()
            .map(|mut s| {
                s.watchers.retain(|w| !w.tx.is_closed());
                s.watchers.len()
            })
            .unwrap_or(0)
    }

    fn add_fault(&self, op: FaultOp, prefix: &str, remaining: Option<usize>) {
        let prefix = prefix
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if let Ok(mut state) = self.state.lock() {
            state.faults.push(Fault {
                op,
                prefix,
                remaining,
            });
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TreeState>, RemoteError> {
        self.state
            .lock()
            .map_err(|_| RemoteError::Unavailable("tree lock poisoned".to_string()))
    }
}

impl TreeState {
    fn check_fault(&mut self, op: FaultOp, path: &[String]) -> Result<(), RemoteError> {
        let hit = self.faults.iter_mut().find(|f| {
            f.op == op
                && f.prefix.len() <= path.len()
                && f.prefix.iter().zip(path).all(|(a, b)| a == b)
                && f.remaining != Some(0)
        });
        if let Some(fault) = hit {
            if let Some(n) = fault.remaining.as_mut() {
                *n -= 1;
            }
            warn!(path = %path.join("/"), ?op, "Injected remote failure");
            return Err(RemoteError::Unavailable(format!(
                "simulated {op:?} failure at /{}",
                path.join("/")
            )));
        }
        Ok(())
    }

    fn read(&self, path: &[String]) -> Option<Value> {
        read_from(&self.root, path)
    }

    fn write(&mut self, path: &[String], value: Value) {
        if value.is_null() {
            remove_at(&mut self.root, path);
        } else {
            write_at(&mut self.root, path, value);
        }
    }

    fn notify(&mut self, changed: &[Vec<String>]) {
        let root = &self.root;
        self.watchers.retain_mut(|w| {
            if w.tx.is_closed() {
                return false;
            }
            if !changed.iter().any(|c| related(c, &w.path)) {
                return true;
            }
            let current = read_from(root, &w.path);
            if current == w.last {
                return true;
            }
            w.last = current.clone();
            w.tx.send(current).is_ok()
        });
    }
}

fn read_from(root: &Value, path: &[String]) -> Option<Value> {
    let mut node = root;
    for seg in path {
        node = node.as_object()?.get(seg)?;
    }
    (!node.is_null()).then(|| node.clone())
}

fn write_at(node: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        write_at(child, rest, value);
    }
}

/// Remove the node at `path`, pruning parents left empty.
fn remove_at(node: &mut Value, path: &[String]) -> bool {
    let Some((head, rest)) = path.split_first() else {
        *node = Value::Null;
        return true;
    };
    let Value::Object(map) = node else {
        return false;
    };
    if rest.is_empty() {
        map.remove(head);
    } else if let Some(child) = map.get_mut(head) {
        if remove_at(child, rest) && child.as_object().map_or(true, Map::is_empty) {
            map.remove(head);
        }
    }
    map.is_empty()
}

#[async_trait]
impl RemoteStore for MemoryTree {
    async fn get(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        let segs = segments(path)?;
        let mut state = self.lock()?;
        state.check_fault(FaultOp::Read, &segs)?;
        Ok(state.read(&segs))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        let segs = segments(path)?;
        let mut state = self.lock()?;
        state.check_fault(FaultOp::Write, &segs)?;
        state.write(&segs, value);
        state.notify(&[segs]);
        Ok(())
    }

    async fn update(&self, path: &str, changes: Map<String, Value>) -> Result<(), RemoteError> {
        let base = segments(path)?;
        let mut targets = Vec::with_capacity(changes.len());
        for (rel, value) in changes {
            let mut full = base.clone();
            full.extend(segments(&rel)?);
            targets.push((full, value));
        }

        let mut state = self.lock()?;
        for (full, _) in &targets {
            state.check_fault(FaultOp::Write, full)?;
        }
        let changed: Vec<Vec<String>> = targets.iter().map(|(p, _)| p.clone()).collect();
        for (full, value) in targets {
            state.write(&full, value);
        }
        debug!(path, writes = changed.len(), "Applied multi-path update");
        state.notify(&changed);
        Ok(())
    }

    async fn transaction(&self, path: &str, mut update: TxFn) -> Result<TxOutcome, RemoteError> {
        let segs = segments(path)?;
        let mut state = self.lock()?;
        state.check_fault(FaultOp::Transaction, &segs)?;

        let current = state.read(&segs);
        match update(current.clone()) {
            TxDecision::Commit(next) => {
                state.write(&segs, next.unwrap_or(Value::Null));
                let snapshot = state.read(&segs);
                state.notify(&[segs]);
                Ok(TxOutcome {
                    committed: true,
                    snapshot,
                })
            }
            TxDecision::Abort => Ok(TxOutcome {
                committed: false,
                snapshot: current,
            }),
        }
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription<Option<Value>>, RemoteError> {
        let segs = segments(path)?;
        let mut state = self.lock()?;
        state.check_fault(FaultOp::Read, &segs)?;

        let (tx, sub) = Subscription::channel();
        let current = state.read(&segs);
        // Initial snapshot; the receiver is still held here so this cannot fail.
        let _ = tx.send(current.clone());
        state.watchers.push(Watcher {
            path: segs,
            last: current,
            tx,
        });
        Ok(sub)
    }
}
