//! Change notifications delivered by the cluster watch

use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

/// Type of change observed for an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Object seen for the first time (including initial list)
    Create,

    /// Object modified
    Update,

    /// Object removed
    Delete,
}

/// A single resource change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    pub namespace: String,
    pub name: String,
    pub change: ChangeKind,
}

impl ResourceEvent {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, change: ChangeKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            change,
        }
    }

    /// Build an event from a watched object
    pub fn from_object<K: Resource>(obj: &K, change: ChangeKind) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
            change,
        }
    }

    /// Translate a raw watcher event
    ///
    /// Objects from the initial (re)list map to `Create`, later applies to
    /// `Update`. Bookkeeping events (`Init`, `InitDone`) yield nothing.
    pub fn from_watch_event<K: Resource>(event: &watcher::Event<K>) -> Option<Self> {
        match event {
            watcher::Event::InitApply(obj) => Some(Self::from_object(obj, ChangeKind::Create)),
            watcher::Event::Apply(obj) => Some(Self::from_object(obj, ChangeKind::Update)),
            watcher::Event::Delete(obj) => Some(Self::from_object(obj, ChangeKind::Delete)),
            watcher::Event::Init | watcher::Event::InitDone => None,
        }
    }
}

/// Decides which change types reach the debouncer
pub trait EventFilter: Send + Sync {
    fn accepts(&self, event: &ResourceEvent) -> bool;
}

/// Passes creates and updates; deletions never warrant a rescan
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateUpdateEvents;

impl EventFilter for CreateUpdateEvents {
    fn accepts(&self, event: &ResourceEvent) -> bool {
        matches!(event.change, ChangeKind::Create | ChangeKind::Update)
    }
}
