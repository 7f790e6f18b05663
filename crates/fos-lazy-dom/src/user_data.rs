//! User data
//!
//! Applications can hang arbitrary values off a node under a string key.
//! Entries travel with the node: clones, imports and adoptions share the
//! same values, and each entry's handler, if any, is told what happened.

use crate::{Document, DomResult, NodeId};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Value attached to a node
pub type UserData = Rc<dyn Any>;

/// Called as `(operation, key, data, source, copy)` once the operation has
/// completed. `copy` is the new node for clone, import and adopt, and
/// `None` for a rename.
pub type UserDataHandler = Rc<dyn Fn(UserDataOperation, &str, &UserData, NodeId, Option<NodeId>)>;

/// Operation reported to a [`UserDataHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDataOperation {
    Cloned,
    Imported,
    Adopted,
    Renamed,
}

#[derive(Clone)]
pub(crate) struct UserDataEntry {
    pub data: UserData,
    pub handler: Option<UserDataHandler>,
}

impl fmt::Debug for UserDataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDataEntry")
            .field("data", &self.data)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl Document {
    /// Attach `data` under `key`, or remove the entry when `data` is
    /// `None`. Returns the value previously stored under the key.
    pub fn set_user_data(
        &mut self,
        node: NodeId,
        key: &str,
        data: Option<UserData>,
        handler: Option<UserDataHandler>,
    ) -> DomResult<Option<UserData>> {
        let slot = self.tree.resolve(node)?;
        let table = &mut self.tree[slot].user_data;
        let previous = match data {
            Some(data) => table.insert(key.to_string(), UserDataEntry { data, handler }),
            None => table.remove(key),
        };
        Ok(previous.map(|entry| entry.data))
    }

    pub fn user_data(&self, node: NodeId, key: &str) -> DomResult<Option<UserData>> {
        let slot = self.tree.resolve(node)?;
        Ok(self.tree[slot].user_data.get(key).map(|entry| entry.data.clone()))
    }

    /// Run the handlers of every copied node carrying user data
    pub(crate) fn notify_user_data(&self, operation: UserDataOperation, copies: &[(NodeId, u32)]) {
        for &(source, slot) in copies {
            let copy = Some(self.tree.id(slot));
            self.run_handlers(operation, slot, source, copy);
        }
    }

    pub(crate) fn run_handlers(&self, operation: UserDataOperation, slot: u32, source: NodeId, copy: Option<NodeId>) {
        let mut entries: Vec<(&String, &UserDataEntry)> = self.tree[slot].user_data.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (key, entry) in entries {
            if let Some(handler) = &entry.handler {
                handler(operation, key.as_str(), &entry.data, source, copy);
            }
        }
    }
}
