//! Per-session todo list, driven by the `todo_write` tool.

use parking_lot::RwLock;

use cw_domain::wire::TodoItem;

/// Session-scoped todo state; every change is mirrored to the client
/// through a `todos` event by the caller.
#[derive(Default)]
pub struct TodoState {
    items: RwLock<Vec<TodoItem>>,
}

impl TodoState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list, returning the new snapshot.
    pub fn replace(&self, items: Vec<TodoItem>) -> Vec<TodoItem> {
        *self.items.write() = items.clone();
        items
    }

    pub fn snapshot(&self) -> Vec<TodoItem> {
        self.items.read().clone()
    }

    /// Clear the list (session reset), returning the empty snapshot.
    pub fn clear(&self) -> Vec<TodoItem> {
        self.items.write().clear();
        Vec::new()
    }
}
