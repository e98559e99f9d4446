use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::{
    label::{Label, LabelAllocator},
    message::{CommandResult, ResultStatus, ServiceEvent, ServiceInfo},
    state::{ErrorCode, ServiceState},
    supervision::RetryConfig,
};

#[derive(Debug)]
pub(crate) struct ServiceEntry {
    pub(crate) label: Label,
    pub(crate) name: String,
    pub(crate) cmd: String,
    pub(crate) state: ServiceState,
    pub(crate) error: ErrorCode,
    pub(crate) pgid: Option<u32>,
    /// Bumped on every launch and every kill.
    pub(crate) generation: u64,
    pub(crate) launches: u64,
    pub(crate) handles: usize,
    pub(crate) retry: RetryConfig,
}

impl ServiceEntry {
    pub(crate) fn snapshot(&self, status: ResultStatus) -> CommandResult {
        CommandResult::new(status, self.state, self.error)
    }

    pub(crate) fn info(&self) -> ServiceInfo {
        ServiceInfo {
            label: self.label,
            name: self.name.clone(),
            cmd: self.cmd.clone(),
            state: self.state,
            error: self.error,
            pid: self.pgid,
            handles: self.handles,
            launches: self.launches,
        }
    }

    pub(crate) fn event(&self) -> ServiceEvent {
        ServiceEvent {
            label: self.label,
            name: self.name.clone(),
            cmd: self.cmd.clone(),
            state: self.state,
            error: self.error,
        }
    }

    pub(crate) fn is_orphaned(&self) -> bool {
        self.handles == 0 && !self.state.is_alive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ServiceTable {
    entries: FxHashMap<Label, ServiceEntry>,
    names: IndexMap<String, Label>,
    labels: LabelAllocator,
}

impl ServiceTable {
    pub(crate) fn insert(&mut self, name: &str, cmd: &str, retry: RetryConfig) -> Label {
        let label = self.labels.next();
        self.entries.insert(
            label,
            ServiceEntry {
                label,
                name: name.to_owned(),
                cmd: cmd.to_owned(),
                state: ServiceState::Unknown,
                error: ErrorCode::Ok,
                pgid: None,
                generation: 0,
                launches: 0,
                handles: 1,
                retry,
            },
        );
        self.names.insert(name.to_owned(), label);
        label
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<Label> {
        self.names.get(name).copied()
    }

    pub(crate) fn get(&self, label: Label) -> Option<&ServiceEntry> {
        self.entries.get(&label)
    }

    pub(crate) fn get_mut(&mut self, label: Label) -> Option<&mut ServiceEntry> {
        self.entries.get_mut(&label)
    }

    pub(crate) fn remove(&mut self, label: Label) -> Option<ServiceEntry> {
        let entry = self.entries.remove(&label)?;
        self.names.shift_remove(&entry.name);
        Some(entry)
    }

    pub(crate) fn release(&mut self, label: Label) -> Option<Released> {
        let entry = self.entries.get_mut(&label)?;
        entry.handles = entry.handles.saturating_sub(1);
        if entry.is_orphaned() {
            self.remove(label);
            Some(Released::Removed)
        } else {
            Some(Released::Kept)
        }
    }

    pub(crate) fn list(&self) -> Vec<ServiceInfo> {
        self.names
            .values()
            .filter_map(|label| self.entries.get(label))
            .map(ServiceEntry::info)
            .collect()
    }

    pub(crate) fn live_groups(&self) -> Vec<(Label, u32)> {
        self.entries
            .values()
            .filter_map(|entry| entry.pgid.map(|pgid| (entry.label, pgid)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    Kept,
    Removed,
}
