//! Optimistic mutations over the in-memory resource list.
//!
//! Every mutation is applied to the [`ResourceView`] immediately and tracked by
//! an [`Optimistic`] record holding what it displaced. The record then ends in
//! exactly one terminal state:
//!
//! - `Confirmed`: the authoritative resource (if any) replaces the provisional one.
//! - `RolledBack`: the displaced state is put back where it was.

use crate::resource::Resource;

/// Session copy of the resources the caller is looking at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceView {
    items: Vec<Resource>,
}

impl ResourceView {
    pub fn new(items: Vec<Resource>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[Resource] {
        &self.items
    }

    pub fn replace_all(&mut self, items: Vec<Resource>) {
        self.items = items;
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.items.iter().find(|r| r.id() == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|r| r.id() == id)
    }

    /// Replace the entry with `id` by `resource`; returns false if `id` is absent.
    pub fn replace(&mut self, id: &str, resource: Resource) -> bool {
        match self.position(id) {
            Some(i) => {
                self.items[i] = resource;
                true
            }
            None => false,
        }
    }

    /// Replace in place when present, otherwise prepend.
    pub fn upsert(&mut self, resource: Resource) {
        let id = resource.id().to_string();
        if !self.replace(&id, resource.clone()) {
            self.items.insert(0, resource);
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<(usize, Resource)> {
        let i = self.position(id)?;
        Some((i, self.items.remove(i)))
    }

    fn insert_at(&mut self, index: usize, resource: Resource) {
        let index = index.min(self.items.len());
        self.items.insert(index, resource);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisticState {
    Pending,
    Confirmed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq)]
enum Displaced {
    /// A provisional resource was added under this id.
    Inserted { id: String },
    /// The resource with this id was overwritten; `previous` is `None` if it was not in view.
    Replaced { id: String, previous: Option<Resource> },
    /// The resource was taken out of the view at `index`.
    Removed { index: Option<usize>, previous: Resource },
}

/// One in-flight optimistic mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimistic {
    state: OptimisticState,
    displaced: Displaced,
}

impl Optimistic {
    /// Show `provisional` at the top of the view.
    pub fn create(view: &mut ResourceView, provisional: Resource) -> Self {
        let id = provisional.id().to_string();
        view.upsert(provisional);
        Self::pending(Displaced::Inserted { id })
    }

    /// Show `merged` in place of the current entry for its id.
    pub fn update(view: &mut ResourceView, merged: Resource) -> Self {
        let id = merged.id().to_string();
        let previous = view.get(&id).cloned();
        if previous.is_some() {
            view.replace(&id, merged);
        }
        Self::pending(Displaced::Replaced { id, previous })
    }

    /// Hide `snapshot` from the view.
    pub fn delete(view: &mut ResourceView, snapshot: Resource) -> Self {
        let index = view.remove(snapshot.id()).map(|(i, _)| i);
        Self::pending(Displaced::Removed {
            index,
            previous: snapshot,
        })
    }

    fn pending(displaced: Displaced) -> Self {
        Self {
            state: OptimisticState::Pending,
            displaced,
        }
    }

    pub fn state(&self) -> OptimisticState {
        self.state
    }

    /// Id of the resource this mutation touched.
    pub fn target_id(&self) -> &str {
        match &self.displaced {
            Displaced::Inserted { id } | Displaced::Replaced { id, .. } => id.as_str(),
            Displaced::Removed { previous, .. } => previous.id(),
        }
    }

    /// Resource as it was before the mutation, if it existed.
    pub fn snapshot(&self) -> Option<&Resource> {
        match &self.displaced {
            Displaced::Inserted { .. } => None,
            Displaced::Replaced { previous, .. } => previous.as_ref(),
            Displaced::Removed { previous, .. } => Some(previous),
        }
    }

    /// Install the server's answer. For deletes `authoritative` is `None`.
    pub fn confirm(&mut self, view: &mut ResourceView, authoritative: Option<Resource>) {
        if !self.enter(OptimisticState::Confirmed) {
            return;
        }
        let Some(resource) = authoritative else {
            return;
        };
        match &self.displaced {
            Displaced::Inserted { id } | Displaced::Replaced { id, .. } => {
                if !view.replace(id, resource.clone()) {
                    view.upsert(resource);
                }
            }
            Displaced::Removed { .. } => {}
        }
    }

    /// Put back whatever the mutation displaced.
    pub fn rollback(&mut self, view: &mut ResourceView) {
        if !self.enter(OptimisticState::RolledBack) {
            return;
        }
        match &self.displaced {
            Displaced::Inserted { id } => {
                view.remove(id);
            }
            Displaced::Replaced { id, previous } => {
                if let Some(previous) = previous {
                    view.replace(id, previous.clone());
                }
            }
            Displaced::Removed { index, previous } => {
                if let Some(i) = index {
                    if view.get(previous.id()).is_none() {
                        view.insert_at(*i, previous.clone());
                    }
                }
            }
        }
    }

    fn enter(&mut self, next: OptimisticState) -> bool {
        if self.state != OptimisticState::Pending {
            tracing::warn!(
                target_id = self.target_id(),
                from = ?self.state,
                to = ?next,
                "ignoring transition out of a settled optimistic update"
            );
            return false;
        }
        self.state = next;
        true
    }
}
