//! Element Attributes
//!
//! Attributes are nodes owned by an element but kept out of its child
//! chain: the element holds their slots in document order and each
//! attribute points back at its owner. Element definitions carry default
//! attributes that new elements of the same name receive as unspecified
//! copies.

use crate::node::{AttrData, ElementData, NodeData, NodeFlags, NodeRecord, QualName};
use crate::observer::MutationRecord;
use crate::{Document, DomError, DomResult, NodeId, NodeKind};

/// How an attribute is looked up on its element
#[derive(Clone, Copy)]
pub(crate) enum AttrKey<'a> {
    Qualified(&'a str),
    Namespaced(Option<&'a str>, &'a str),
}

impl AttrKey<'_> {
    fn matches(&self, name: &QualName) -> bool {
        match *self {
            AttrKey::Qualified(q) => name.qualified() == q,
            AttrKey::Namespaced(ns, local) => {
                name.namespace() == ns.filter(|n| !n.is_empty()) && name.local_name() == local
            }
        }
    }
}

impl Document {
    /// Resolve an element (or definition) and sync its attributes
    fn element_slot(&mut self, element: NodeId) -> DomResult<u32> {
        let slot = self.tree.resolve(element)?;
        match self.tree[slot].kind() {
            NodeKind::Element | NodeKind::ElementDefinition => {
                self.ensure_data(slot)?;
                Ok(slot)
            }
            actual => Err(DomError::InvalidNodeKind {
                expected: "element",
                actual,
            }),
        }
    }

    fn attr_slot(&self, attr: NodeId) -> DomResult<u32> {
        let slot = self.tree.resolve(attr)?;
        match self.tree[slot].kind() {
            NodeKind::Attribute => Ok(slot),
            actual => Err(DomError::InvalidNodeKind {
                expected: "attribute",
                actual,
            }),
        }
    }

    pub(crate) fn find_attr(&self, element: u32, key: AttrKey<'_>) -> Option<u32> {
        self.tree[element]
            .data
            .attributes()?
            .iter()
            .copied()
            .find(|&a| self.tree[a].data.qual_name().is_some_and(|n| key.matches(n)))
    }

    pub(crate) fn attr_data(&self, attr: u32) -> Option<&AttrData> {
        match &self.tree[attr].data {
            NodeData::Attribute(a) => Some(a),
            _ => None,
        }
    }

    /// Keep the identifier table in step with an ID attribute's value
    pub(crate) fn reindex_identifier(&mut self, element: u32, old: Option<&str>, new: Option<&str>) {
        if let Some(old) = old {
            if self.identifiers.get(old) == Some(&element) {
                self.identifiers.remove(old);
            }
        }
        if let Some(new) = new {
            self.identifiers.insert(new.to_string(), element);
        }
    }

    pub(crate) fn push_attr_record(&mut self, element: NodeId, name: &str, old: Option<String>) {
        self.mutations
            .push(MutationRecord::attribute(element, name, old));
    }

    pub fn get_attribute(&mut self, element: NodeId, name: &str) -> DomResult<Option<String>> {
        let slot = self.element_slot(element)?;
        Ok(self
            .find_attr(slot, AttrKey::Qualified(name))
            .and_then(|a| self.attr_data(a))
            .map(|a| a.value.clone()))
    }

    pub fn get_attribute_ns(
        &mut self,
        element: NodeId,
        namespace: Option<&str>,
        local_name: &str,
    ) -> DomResult<Option<String>> {
        let slot = self.element_slot(element)?;
        Ok(self
            .find_attr(slot, AttrKey::Namespaced(namespace, local_name))
            .and_then(|a| self.attr_data(a))
            .map(|a| a.value.clone()))
    }

    pub fn has_attribute(&mut self, element: NodeId, name: &str) -> DomResult<bool> {
        let slot = self.element_slot(element)?;
        Ok(self.find_attr(slot, AttrKey::Qualified(name)).is_some())
    }

    pub fn get_attribute_node(&mut self, element: NodeId, name: &str) -> DomResult<Option<NodeId>> {
        let slot = self.element_slot(element)?;
        Ok(self
            .find_attr(slot, AttrKey::Qualified(name))
            .map(|a| self.tree.id(a)))
    }

    /// Attribute nodes in document order
    pub fn attributes(&mut self, element: NodeId) -> DomResult<Vec<NodeId>> {
        let slot = self.element_slot(element)?;
        Ok(self.tree[slot]
            .data
            .attributes()
            .unwrap_or_default()
            .iter()
            .map(|&a| self.tree.id(a))
            .collect())
    }

    pub fn set_attribute(&mut self, element: NodeId, name: &str, value: &str) -> DomResult<()> {
        self.check_name(name)?;
        self.set_attribute_with(element, AttrKey::Qualified(name), QualName::new(name, None), value)
    }

    pub fn set_attribute_ns(
        &mut self,
        element: NodeId,
        namespace: Option<&str>,
        qualified_name: &str,
        value: &str,
    ) -> DomResult<()> {
        self.check_qualified_name(qualified_name, namespace)?;
        let name = QualName::new(qualified_name, namespace);
        let local = name.local_name().to_string();
        self.set_attribute_with(element, AttrKey::Namespaced(namespace, &local), name.clone(), value)
    }

    fn set_attribute_with(&mut self, element: NodeId, key: AttrKey<'_>, name: QualName, value: &str) -> DomResult<()> {
        let slot = self.element_slot(element)?;
        self.check_writable(slot)?;

        match self.find_attr(slot, key) {
            Some(attr) => {
                self.check_writable(attr)?;
                let old = self.attr_data(attr).map(|a| a.value.clone());
                let is_id = self.tree[attr].flags.has(NodeFlags::ID);
                self.tree[attr].data.set_value(value);
                self.tree[attr].flags.set(NodeFlags::SPECIFIED, true);
                if is_id {
                    self.reindex_identifier(slot, old.as_deref(), Some(value));
                }
                let qualified = name.qualified().to_string();
                self.push_attr_record(element, &qualified, old);
            }
            None => {
                self.namespaces.record(&name);
                let qualified = name.qualified().to_string();
                let attr = self.tree.alloc(NodeRecord::new(NodeData::Attribute(AttrData {
                    name,
                    value: value.to_string(),
                    owner: Some(slot),
                })));
                if let Some(list) = self.tree[slot].data.attributes_mut() {
                    list.push(attr);
                }
                self.push_attr_record(element, &qualified, None);
            }
        }
        Ok(())
    }

    /// Attach an attribute node, replacing one of the same name.
    /// Returns the replaced node, now detached.
    pub fn set_attribute_node(&mut self, element: NodeId, attr: NodeId) -> DomResult<Option<NodeId>> {
        let slot = self.element_slot(element)?;
        let a = self.attr_slot(attr)?;
        self.check_writable(slot)?;
        let (owner, name) = match self.attr_data(a) {
            Some(data) => (data.owner, data.name.clone()),
            None => return Ok(None),
        };
        match owner {
            Some(o) if o == slot => return Ok(Some(attr)),
            Some(_) => return Err(DomError::hierarchy("attribute is in use by another element")),
            None => {}
        }

        let key = AttrKey::Qualified(name.qualified());
        let replaced = self.find_attr(slot, key);
        if let Some(r) = replaced {
            self.check_writable(r)?;
        }
        let old_value = replaced.and_then(|r| self.attr_data(r)).map(|d| d.value.clone());
        let position = replaced.and_then(|r| {
            self.tree[slot]
                .data
                .attributes()
                .and_then(|list| list.iter().position(|&x| x == r))
        });
        if let Some(r) = replaced {
            self.detach_attr(slot, r);
        }

        self.namespaces.record(&name);
        if let NodeData::Attribute(data) = &mut self.tree[a].data {
            data.owner = Some(slot);
        }
        if let Some(list) = self.tree[slot].data.attributes_mut() {
            match position {
                Some(i) => list.insert(i, a),
                None => list.push(a),
            }
        }
        if self.tree[a].flags.has(NodeFlags::ID) {
            let value = self.attr_data(a).map(|d| d.value.clone());
            self.reindex_identifier(slot, None, value.as_deref());
        }
        self.push_attr_record(element, name.qualified(), old_value);
        Ok(replaced.map(|r| self.tree.id(r)))
    }

    /// Unlink an attribute from its element, dropping any identifier entry
    pub(crate) fn detach_attr(&mut self, element: u32, attr: u32) {
        if let Some(list) = self.tree[element].data.attributes_mut() {
            list.retain(|&x| x != attr);
        }
        let value = self.attr_data(attr).map(|d| d.value.clone());
        if self.tree[attr].flags.has(NodeFlags::ID) {
            self.reindex_identifier(element, value.as_deref(), None);
        }
        if let NodeData::Attribute(data) = &mut self.tree[attr].data {
            data.owner = None;
        }
    }

    /// Remove an attribute by name; a default from the element's
    /// definition takes its place. The removed node is freed.
    pub fn remove_attribute(&mut self, element: NodeId, name: &str) -> DomResult<()> {
        let slot = self.element_slot(element)?;
        let Some(attr) = self.find_attr(slot, AttrKey::Qualified(name)) else {
            return Ok(());
        };
        self.check_writable(attr)?;
        self.remove_attr_slot(element, slot, attr);
        self.free_subtree(attr);
        Ok(())
    }

    pub fn remove_attribute_node(&mut self, element: NodeId, attr: NodeId) -> DomResult<NodeId> {
        let slot = self.element_slot(element)?;
        let a = self.attr_slot(attr)?;
        if self.attr_data(a).and_then(|d| d.owner) != Some(slot) {
            return Err(DomError::NotFound);
        }
        self.check_writable(a)?;
        self.remove_attr_slot(element, slot, a);
        Ok(attr)
    }

    fn remove_attr_slot(&mut self, element: NodeId, slot: u32, attr: u32) {
        let (name, old) = match self.attr_data(attr) {
            Some(d) => (d.name.clone(), d.value.clone()),
            None => return,
        };
        self.detach_attr(slot, attr);
        self.push_attr_record(element, name.qualified(), Some(old));
        self.reinstate_default(slot, name.qualified());
    }

    /// Put back the definition's default for `name`, if it declares one
    pub(crate) fn reinstate_default(&mut self, element: u32, name: &str) {
        let default = self
            .definition_for(element)
            .and_then(|def| self.find_attr(def, AttrKey::Qualified(name)))
            .and_then(|d| self.attr_data(d))
            .map(|d| (d.name.clone(), d.value.clone()));
        if let Some((name, value)) = default {
            let _quiet = self.mutations.suppress();
            self.add_default(element, name, value);
        }
    }

    /// Owning element of an attribute
    pub fn owner_element(&self, attr: NodeId) -> DomResult<Option<NodeId>> {
        let a = self.attr_slot(attr)?;
        Ok(self.attr_data(a).and_then(|d| d.owner).map(|o| self.tree.id(o)))
    }

    /// Whether the attribute was given explicitly rather than defaulted
    pub fn is_specified(&self, attr: NodeId) -> DomResult<bool> {
        let a = self.attr_slot(attr)?;
        Ok(self.tree[a].flags.has(NodeFlags::SPECIFIED))
    }

    pub fn is_id(&self, attr: NodeId) -> DomResult<bool> {
        let a = self.attr_slot(attr)?;
        Ok(self.tree[a].flags.has(NodeFlags::ID))
    }

    /// Declare (or undeclare) the named attribute as the element's ID
    pub fn set_id_attribute(&mut self, element: NodeId, name: &str, is_id: bool) -> DomResult<()> {
        let slot = self.element_slot(element)?;
        self.check_writable(slot)?;
        let attr = self
            .find_attr(slot, AttrKey::Qualified(name))
            .ok_or(DomError::NotFound)?;
        let value = self.attr_data(attr).map(|d| d.value.clone());
        self.tree[attr].flags.set(NodeFlags::ID, is_id);
        if is_id {
            self.reindex_identifier(slot, None, value.as_deref());
        } else {
            self.reindex_identifier(slot, value.as_deref(), None);
        }
        Ok(())
    }

    // -- element definitions -----------------------------------------------

    /// Create (or return the existing) definition for an element name
    pub fn create_element_definition(&mut self, name: &str) -> DomResult<NodeId> {
        self.check_name(name)?;
        if let Some(&slot) = self.definitions.get(name) {
            return Ok(self.tree.id(slot));
        }
        let slot = self.tree.alloc(NodeRecord::new(NodeData::ElementDefinition(ElementData {
            name: QualName::new(name, None),
            attributes: Vec::new(),
        })));
        self.definitions.insert(name.to_string(), slot);
        Ok(self.tree.id(slot))
    }

    pub fn element_definition(&self, name: &str) -> Option<NodeId> {
        self.definitions.get(name).map(|&slot| self.tree.id(slot))
    }

    /// Add or change a default attribute on a definition
    pub fn set_default_attribute(&mut self, definition: NodeId, name: &str, value: &str) -> DomResult<()> {
        let slot = self.tree.resolve(definition)?;
        let kind = self.tree[slot].kind();
        if kind != NodeKind::ElementDefinition {
            return Err(DomError::InvalidNodeKind {
                expected: "element definition",
                actual: kind,
            });
        }
        self.ensure_data(slot)?;
        let _quiet = self.mutations.suppress();
        self.set_attribute(definition, name, value)?;
        if let Some(attr) = self.find_attr(slot, AttrKey::Qualified(name)) {
            self.tree[attr].flags.set(NodeFlags::SPECIFIED, false);
        }
        Ok(())
    }

    pub(crate) fn definition_for(&self, element: u32) -> Option<u32> {
        if self.tree[element].kind() != NodeKind::Element {
            return None;
        }
        let name = self.tree[element].data.name();
        self.definitions.get(name).copied()
    }

    fn add_default(&mut self, element: u32, name: QualName, value: String) {
        let mut record = NodeRecord::new(NodeData::Attribute(AttrData {
            name,
            value,
            owner: Some(element),
        }));
        record.flags.set(NodeFlags::SPECIFIED, false);
        let attr = self.tree.alloc(record);
        if let Some(list) = self.tree[element].data.attributes_mut() {
            list.push(attr);
        }
    }

    /// Give an element unspecified copies of any defaults it lacks
    pub(crate) fn apply_default_attributes(&mut self, element: u32) {
        let Some(def) = self.definition_for(element) else {
            return;
        };
        let defaults: Vec<(QualName, String)> = self.tree[def]
            .data
            .attributes()
            .unwrap_or_default()
            .iter()
            .filter_map(|&a| self.attr_data(a))
            .map(|d| (d.name.clone(), d.value.clone()))
            .collect();

        let _quiet = self.mutations.suppress();
        for (name, value) in defaults {
            if self.find_attr(element, AttrKey::Qualified(name.qualified())).is_none() {
                self.add_default(element, name, value);
            }
        }
    }
}
