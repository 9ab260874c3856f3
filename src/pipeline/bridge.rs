//! Thread boundary between the refresh worker and its caller.
//!
//! The worker thread owns the filter tree, the scheduler and the undo history.
//! Callers send `WorkerCommand`s and drain `WorkerMessage`s. Abort and
//! progress bypass the channels: a refresh blocks the worker, so the caller
//! holds clones of the scheduler's handles and uses them directly.

use crate::pipeline::analysis::{TreeAnalyser, TreeDiagnostic};
use crate::pipeline::error::RefreshError;
use crate::pipeline::factory::FilterFactory;
use crate::pipeline::filter::{Filter, FilterBehavior, FilterKind, PropertyValue};
use crate::pipeline::history::TreeHistory;
use crate::pipeline::id::FilterId;
use crate::pipeline::progress::{AbortHandle, Progress, ProgressHandle};
use crate::pipeline::scheduler::{RefreshOutput, RefreshScheduler};
use crate::pipeline::tree::FilterTree;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Messages sent from the worker to the caller.
#[derive(Debug)]
pub enum WorkerMessage {
    RefreshComplete(RefreshOutput),

    /// The refresh failed or was aborted; no partial result exists.
    RefreshFailed(RefreshError),

    FilterAdded(FilterId),

    /// A structural, property or history edit was applied.
    EditApplied,

    /// An edit was refused; the tree is unchanged.
    EditRejected(String),

    /// Analysis of the tree as it stands after the last edit.
    Diagnostics(Vec<TreeDiagnostic>),

    Topology(TopologySnapshot),

    /// Worker is shutting down.
    Shutdown,
}

/// Snapshot of one filter for display.
#[derive(Debug, Clone)]
pub struct FilterSnapshot {
    pub id: FilterId,
    pub parent: Option<FilterId>,
    pub kind: FilterKind,
    pub name: String,
    pub properties: Vec<(String, PropertyValue)>,
    pub cache_valid: bool,
}

/// Filters in depth-first order.
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    pub filters: Vec<FilterSnapshot>,
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Commands sent from the caller to the worker.
#[derive(Debug)]
pub enum WorkerCommand {
    Refresh,
    AddFilter {
        parent: Option<FilterId>,
        kind: FilterKind,
        properties: Vec<(String, PropertyValue)>,
    },
    /// Insert an already-built filter, such as a plugin.
    InsertFilter {
        parent: Option<FilterId>,
        filter: Filter,
    },
    RemoveSubtree(FilterId),
    MoveSubtree {
        id: FilterId,
        parent: Option<FilterId>,
    },
    CopySubtree {
        id: FilterId,
        parent: Option<FilterId>,
    },
    SetProperty {
        id: FilterId,
        key: String,
        value: PropertyValue,
    },
    Undo,
    Redo,
    Analyse,
    RequestTopology,
    Shutdown,
}

/// Channel capacity for commands (caller → worker).
const CMD_CHANNEL_CAPACITY: usize = 256;
/// Channel capacity for messages (worker → caller).
const MSG_CHANNEL_CAPACITY: usize = 1024;

/// Worker loop state. Runs on its own thread via `RefreshBridge::spawn`.
pub struct RefreshWorker {
    tree: FilterTree,
    scheduler: RefreshScheduler,
    history: TreeHistory,
    cmd_rx: Receiver<WorkerCommand>,
    msg_tx: Sender<WorkerMessage>,
}

impl RefreshWorker {
    /// Process commands until `Shutdown` or until the caller hangs up.
    pub fn run(mut self) {
        tracing::info!("Refresh worker started with {} filters", self.tree.len());
        while let Ok(cmd) = self.cmd_rx.recv() {
            if !self.handle(cmd) {
                break;
            }
        }
        let _ = self.msg_tx.send(WorkerMessage::Shutdown);
        tracing::info!("Refresh worker exiting");
    }

    /// Returns false when the worker should stop.
    fn handle(&mut self, cmd: WorkerCommand) -> bool {
        match cmd {
            WorkerCommand::Refresh => self.handle_refresh(),
            WorkerCommand::AddFilter {
                parent,
                kind,
                properties,
            } => {
                let built = FilterFactory::create_with_properties(
                    kind,
                    properties.iter().map(|(k, v)| (k.as_str(), v)),
                );
                match built {
                    Ok(filter) => self.handle_insert(parent, filter),
                    Err(err) => self.reject(format!("cannot create {kind}: {err}")),
                }
            }
            WorkerCommand::InsertFilter { parent, filter } => self.handle_insert(parent, filter),
            WorkerCommand::RemoveSubtree(id) => {
                self.edit(|tree| tree.remove_subtree(id).map(|_| true));
            }
            WorkerCommand::MoveSubtree { id, parent } => {
                self.edit(|tree| tree.move_subtree(id, parent).map(|()| true));
            }
            WorkerCommand::CopySubtree { id, parent } => {
                self.edit(|tree| tree.copy_subtree(id, parent).map(|_| true));
            }
            WorkerCommand::SetProperty { id, key, value } => {
                self.edit(|tree| tree.set_property(id, &key, &value));
            }
            WorkerCommand::Undo => {
                if self.history.undo(&mut self.tree) {
                    self.applied();
                } else {
                    self.reject("nothing to undo".to_string());
                }
            }
            WorkerCommand::Redo => {
                if self.history.redo(&mut self.tree) {
                    self.applied();
                } else {
                    self.reject("nothing to redo".to_string());
                }
            }
            WorkerCommand::Analyse => self.send_diagnostics(),
            WorkerCommand::RequestTopology => {
                let _ = self.msg_tx.send(WorkerMessage::Topology(self.topology()));
            }
            WorkerCommand::Shutdown => return false,
        }
        true
    }

    fn handle_refresh(&mut self) {
        let msg = match self.scheduler.refresh(&mut self.tree) {
            Ok(output) => WorkerMessage::RefreshComplete(output),
            Err(err) => WorkerMessage::RefreshFailed(err),
        };
        let _ = self.msg_tx.send(msg);
    }

    fn handle_insert(&mut self, parent: Option<FilterId>, filter: Filter) {
        let before = self.tree.clone_uncached();
        match self.tree.add_filter(parent, filter) {
            Ok(id) => {
                self.history.record(before);
                let _ = self.msg_tx.send(WorkerMessage::FilterAdded(id));
                self.send_diagnostics();
            }
            Err(err) => self.reject(err.to_string()),
        }
    }

    /// Apply `f`, recording an undo snapshot only if it succeeds.
    /// Apply `f`, which reports whether it changed the tree. Only changes
    /// become undo steps.
    fn edit<E: std::fmt::Display>(
        &mut self,
        f: impl FnOnce(&mut FilterTree) -> Result<bool, E>,
    ) {
        let before = self.tree.clone_uncached();
        match f(&mut self.tree) {
            Ok(true) => {
                self.history.record(before);
                self.applied();
            }
            Ok(false) => {
                tracing::debug!("Edit left the tree unchanged; no undo step recorded");
                self.applied();
            }
            Err(err) => self.reject(err.to_string()),
        }
    }

    fn applied(&mut self) {
        let _ = self.msg_tx.send(WorkerMessage::EditApplied);
        self.send_diagnostics();
    }

    fn reject(&self, reason: String) {
        tracing::warn!("Edit rejected: {}", reason);
        let _ = self.msg_tx.send(WorkerMessage::EditRejected(reason));
    }

    fn send_diagnostics(&self) {
        let diags = TreeAnalyser::analyse(&self.tree);
        let _ = self.msg_tx.send(WorkerMessage::Diagnostics(diags));
    }

    fn topology(&self) -> TopologySnapshot {
        let filters = self
            .tree
            .depth_first()
            .into_iter()
            .filter_map(|id| {
                let filter = self.tree.filter(id)?;
                Some(FilterSnapshot {
                    id,
                    parent: self.tree.parent(id),
                    kind: filter.kind(),
                    name: filter.name().to_string(),
                    properties: filter.properties(),
                    cache_valid: self.tree.cache(id).is_some_and(|c| c.is_valid()),
                })
            })
            .collect();
        TopologySnapshot {
            filters,
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        }
    }
}

/// Caller-side handle for the refresh worker thread.
pub struct RefreshBridge {
    cmd_tx: Sender<WorkerCommand>,
    msg_rx: Receiver<WorkerMessage>,
    abort: AbortHandle,
    progress: ProgressHandle,
    handle: Option<JoinHandle<()>>,
}

impl RefreshBridge {
    /// Move `tree` onto a new worker thread.
    pub fn spawn(
        tree: FilterTree,
        scheduler: RefreshScheduler,
        history: TreeHistory,
    ) -> std::io::Result<Self> {
        let (cmd_tx, cmd_rx) = bounded(CMD_CHANNEL_CAPACITY);
        let (msg_tx, msg_rx) = bounded(MSG_CHANNEL_CAPACITY);
        let abort = scheduler.abort_handle();
        let progress = scheduler.progress_handle();

        let worker = RefreshWorker {
            tree,
            scheduler,
            history,
            cmd_rx,
            msg_tx,
        };
        let handle = std::thread::Builder::new()
            .name("refresh-worker".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            cmd_tx,
            msg_rx,
            abort,
            progress,
            handle: Some(handle),
        })
    }

    pub fn send_command(&self, cmd: WorkerCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn refresh(&self) {
        let _ = self.cmd_tx.send(WorkerCommand::Refresh);
    }

    pub fn set_property(&self, id: FilterId, key: impl Into<String>, value: PropertyValue) {
        let _ = self.cmd_tx.send(WorkerCommand::SetProperty {
            id,
            key: key.into(),
            value,
        });
    }

    pub fn add_filter(&self, parent: Option<FilterId>, kind: FilterKind) {
        let _ = self.cmd_tx.send(WorkerCommand::AddFilter {
            parent,
            kind,
            properties: Vec::new(),
        });
    }

    pub fn undo(&self) {
        let _ = self.cmd_tx.send(WorkerCommand::Undo);
    }

    pub fn redo(&self) {
        let _ = self.cmd_tx.send(WorkerCommand::Redo);
    }

    /// Ask the running refresh, if any, to stop at its next abort check.
    /// A request made while idle is dropped when the next refresh starts.
    pub fn abort(&self) {
        self.abort.request();
    }

    pub fn progress(&self) -> Progress {
        self.progress.snapshot()
    }

    /// Drain all pending messages.
    pub fn drain(&self) -> Vec<WorkerMessage> {
        self.msg_rx.try_iter().collect()
    }

    pub fn try_recv(&self) -> Option<WorkerMessage> {
        self.msg_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next message. `None` on timeout or when
    /// the worker is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerMessage> {
        match self.msg_rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.cmd_tx.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Refresh worker panicked");
            }
        }
    }
}

impl Drop for RefreshBridge {
    fn drop(&mut self) {
        self.stop();
    }
}
