//! XML name checks
//!
//! Creation and rename calls validate names against the XML 1.0 `Name`
//! production and, for namespace-aware calls, the `QName` production plus
//! the reserved `xml` / `xmlns` bindings.

use crate::attributes::AttrKey;
use crate::node::{NodeData, NodeFlags, QualName};
use crate::user_data::UserDataOperation;
use crate::{Document, DomError, DomResult, NodeId, NodeKind, XMLNS_NAMESPACE, XML_NAMESPACE};

fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z' |
        '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}' |
        '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' | '\u{200C}'..='\u{200D}' |
        '\u{2070}'..='\u{218F}' | '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}' |
        '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' | '\u{10000}'..='\u{EFFFF}'
    )
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' |
            '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}'
        )
}

/// `Name` production
pub fn is_xml_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if is_name_start_char(first) => chars.all(is_name_char),
        _ => false,
    }
}

/// `NCName`: a name without colons
pub fn is_nc_name(s: &str) -> bool {
    !s.contains(':') && is_xml_name(s)
}

pub(crate) fn check_name(name: &str) -> DomResult<()> {
    if is_xml_name(name) {
        Ok(())
    } else {
        Err(DomError::InvalidCharacter { name: name.to_string() })
    }
}

/// Validate a qualified name against the namespace it is bound to
pub(crate) fn check_qualified_name(qualified: &str, namespace: Option<&str>) -> DomResult<()> {
    check_name(qualified)?;
    let namespace = namespace.filter(|ns| !ns.is_empty());
    let (prefix, local) = match qualified.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qualified),
    };
    if prefix.is_some_and(|p| !is_nc_name(p)) || !is_nc_name(local) {
        return Err(DomError::namespace("malformed qualified name"));
    }

    match (prefix, namespace) {
        (Some(_), None) => Err(DomError::namespace("prefix without a namespace")),
        (Some("xml"), Some(ns)) if ns != XML_NAMESPACE => {
            Err(DomError::namespace("xml prefix bound to another namespace"))
        }
        (Some("xmlns"), Some(ns)) if ns != XMLNS_NAMESPACE => {
            Err(DomError::namespace("xmlns prefix bound to another namespace"))
        }
        (None, ns) if qualified == "xmlns" && ns != Some(XMLNS_NAMESPACE) => {
            Err(DomError::namespace("xmlns must be in the xmlns namespace"))
        }
        (p, Some(XMLNS_NAMESPACE)) if p != Some("xmlns") && qualified != "xmlns" => {
            Err(DomError::namespace("xmlns namespace used without the xmlns prefix"))
        }
        _ => Ok(()),
    }
}

impl Document {
    /// Turn name validation on or off. On by default; parsers that have
    /// already checked their input may switch it off.
    pub fn set_strict_error_checking(&mut self, on: bool) {
        self.strict_error_checking = on;
    }

    pub fn strict_error_checking(&self) -> bool {
        self.strict_error_checking
    }

    pub(crate) fn check_name(&self, name: &str) -> DomResult<()> {
        if self.strict_error_checking {
            check_name(name)?;
        }
        Ok(())
    }

    pub(crate) fn check_qualified_name(&self, qualified: &str, namespace: Option<&str>) -> DomResult<()> {
        if self.strict_error_checking {
            check_qualified_name(qualified, namespace)?;
        }
        Ok(())
    }

    /// Rename an element or attribute in place and return it.
    ///
    /// A renamed element drops the defaults of its old definition and picks
    /// up those of the new one. A renamed attribute is re-attached under
    /// its new name, replacing any attribute already using that name, and
    /// the old name's default, if any, is put back.
    pub fn rename_node(&mut self, node: NodeId, namespace: Option<&str>, qualified_name: &str) -> DomResult<NodeId> {
        let slot = self.tree.resolve(node)?;
        let kind = self.tree[slot].kind();
        if !matches!(kind, NodeKind::Element | NodeKind::Attribute) {
            return Err(DomError::NotSupported {
                operation: "rename this kind of node",
            });
        }
        self.ensure_data(slot)?;
        match namespace {
            Some(_) => self.check_qualified_name(qualified_name, namespace)?,
            None => self.check_name(qualified_name)?,
        }
        self.check_writable(slot)?;
        if let Some(owner) = self.attr_data(slot).and_then(|d| d.owner) {
            if let Some(taken) = self.find_attr(owner, AttrKey::Qualified(qualified_name)) {
                if taken != slot {
                    self.check_writable(taken)?;
                }
            }
        }

        let name = QualName::new(qualified_name, namespace);
        self.namespaces.record(&name);
        if kind == NodeKind::Element {
            self.rename_element(slot, name);
        } else {
            self.rename_attribute(slot, name);
        }
        tracing::debug!(slot, name = qualified_name, "renamed node");
        self.run_handlers(UserDataOperation::Renamed, slot, node, None);
        Ok(node)
    }

    fn rename_element(&mut self, slot: u32, name: QualName) {
        let defaulted: Vec<u32> = self.tree[slot]
            .data
            .attributes()
            .unwrap_or_default()
            .iter()
            .copied()
            .filter(|&a| !self.tree[a].flags.has(NodeFlags::SPECIFIED))
            .collect();
        for attr in defaulted {
            self.detach_attr(slot, attr);
            self.free_subtree(attr);
        }
        self.tree[slot].data.set_qual_name(name);
        self.apply_default_attributes(slot);
    }

    fn rename_attribute(&mut self, slot: u32, name: QualName) {
        let Some(owner) = self.attr_data(slot).and_then(|d| d.owner) else {
            self.tree[slot].data.set_qual_name(name);
            return;
        };
        let element = self.tree.id(owner);
        let (old_name, value) = match self.attr_data(slot) {
            Some(d) => (d.name.qualified().to_string(), d.value.clone()),
            None => return,
        };

        self.detach_attr(owner, slot);
        self.push_attr_record(element, &old_name, Some(value.clone()));
        self.tree[slot].data.set_qual_name(name.clone());

        let replaced = self.find_attr(owner, AttrKey::Qualified(name.qualified()));
        let position = replaced.and_then(|r| {
            self.tree[owner]
                .data
                .attributes()
                .and_then(|list| list.iter().position(|&x| x == r))
        });
        let replaced_value = replaced.and_then(|r| self.attr_data(r)).map(|d| d.value.clone());
        if let Some(r) = replaced {
            self.detach_attr(owner, r);
            self.free_subtree(r);
        }

        if let NodeData::Attribute(data) = &mut self.tree[slot].data {
            data.owner = Some(owner);
        }
        if let Some(list) = self.tree[owner].data.attributes_mut() {
            match position {
                Some(i) => list.insert(i, slot),
                None => list.push(slot),
            }
        }
        if self.tree[slot].flags.has(NodeFlags::ID) {
            self.reindex_identifier(owner, None, Some(&value));
        }
        self.push_attr_record(element, name.qualified(), replaced_value);
        if old_name != name.qualified() {
            self.reinstate_default(owner, &old_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_names() {
        for ok in ["a", "_x", "svg:rect", "h1", "caf\u{E9}", "a.b-c", ":odd"] {
            assert!(is_xml_name(ok), "{ok}");
        }
        for bad in ["", "1a", "-x", "a b", "a<b", ".x"] {
            assert!(!is_xml_name(bad), "{bad}");
        }
        assert!(is_nc_name("rect"));
        assert!(!is_nc_name("svg:rect"));
    }

    #[test]
    fn test_qualified_names() {
        assert!(check_qualified_name("svg:rect", Some("urn:svg")).is_ok());
        assert!(check_qualified_name("rect", None).is_ok());
        assert!(check_qualified_name("xml:lang", Some(XML_NAMESPACE)).is_ok());
        assert!(check_qualified_name("xmlns:a", Some(XMLNS_NAMESPACE)).is_ok());
        assert!(check_qualified_name("xmlns", Some(XMLNS_NAMESPACE)).is_ok());

        assert!(matches!(
            check_qualified_name("1x", None),
            Err(DomError::InvalidCharacter { .. })
        ));
        for (name, ns) in [
            ("a:b", None),
            ("a:b:c", Some("urn:x")),
            (":b", Some("urn:x")),
            ("xml:lang", Some("urn:x")),
            ("xmlns", None),
            ("a:b", Some(XMLNS_NAMESPACE)),
        ] {
            assert!(
                matches!(check_qualified_name(name, ns), Err(DomError::Namespace { .. })),
                "{name}"
            );
        }
    }

    #[test]
    fn test_strict_checking_toggle() {
        let mut doc = Document::new();
        assert!(doc.strict_error_checking());
        assert!(matches!(
            doc.create_element("1x"),
            Err(DomError::InvalidCharacter { .. })
        ));
        doc.set_strict_error_checking(false);
        assert!(doc.create_element("1x").is_ok());
    }

    #[test]
    fn test_rename_element_swaps_defaults() {
        let mut doc = Document::new();
        let img = doc.create_element_definition("img").unwrap();
        doc.set_default_attribute(img, "alt", "").unwrap();
        let input = doc.create_element_definition("input").unwrap();
        doc.set_default_attribute(input, "type", "text").unwrap();

        let el = doc.create_element("img").unwrap();
        doc.set_attribute(el, "src", "a.png").unwrap();
        let renamed = doc.rename_node(el, Some("urn:x"), "x:input").unwrap();

        assert_eq!(renamed, el);
        assert_eq!(doc.node_name(el).unwrap(), "x:input");
        assert_eq!(doc.namespace_uri(el).unwrap().as_deref(), Some("urn:x"));
        assert!(!doc.has_attribute(el, "alt").unwrap());
        assert_eq!(doc.get_attribute(el, "src").unwrap().as_deref(), Some("a.png"));

        doc.rename_node(el, None, "input").unwrap();
        assert_eq!(doc.get_attribute(el, "type").unwrap().as_deref(), Some("text"));
    }

    #[test]
    fn test_rename_attribute_replaces_same_name() {
        let mut doc = Document::new();
        let el = doc.create_element("e").unwrap();
        doc.set_attribute(el, "a", "1").unwrap();
        doc.set_attribute(el, "b", "2").unwrap();
        let a = doc.get_attribute_node(el, "a").unwrap().unwrap();
        let b = doc.get_attribute_node(el, "b").unwrap().unwrap();
        let before = doc.live_node_count();

        doc.rename_node(a, None, "b").unwrap();
        assert_eq!(doc.get_attribute(el, "b").unwrap().as_deref(), Some("1"));
        assert!(!doc.has_attribute(el, "a").unwrap());
        assert_eq!(doc.attributes(el).unwrap(), vec![a]);
        assert_eq!(doc.owner_element(b), Err(DomError::NotFound));
        assert_eq!(doc.live_node_count(), before - 1);
    }

    #[test]
    fn test_rename_attribute_reinstates_old_default() {
        let mut doc = Document::new();
        let def = doc.create_element_definition("input").unwrap();
        doc.set_default_attribute(def, "type", "text").unwrap();
        let el = doc.create_element("input").unwrap();
        doc.set_attribute(el, "type", "radio").unwrap();
        let attr = doc.get_attribute_node(el, "type").unwrap().unwrap();

        doc.rename_node(attr, None, "kind").unwrap();
        assert_eq!(doc.get_attribute(el, "kind").unwrap().as_deref(), Some("radio"));
        assert_eq!(doc.get_attribute(el, "type").unwrap().as_deref(), Some("text"));

        // Same name again: no duplicate, nothing reinstated
        doc.rename_node(attr, None, "kind").unwrap();
        assert_eq!(doc.attributes(el).unwrap().len(), 2);
    }

    #[test]
    fn test_rename_reports_to_handlers() {
        use crate::{UserData, UserDataHandler};
        use std::cell::Cell;
        use std::rc::Rc;

        let mut doc = Document::new();
        let el = doc.create_element("e").unwrap();
        let renamed = Rc::new(Cell::new(0));
        let count = renamed.clone();
        let handler: UserDataHandler = Rc::new(
            move |op: UserDataOperation, _key: &str, _data: &UserData, _src: NodeId, dst: Option<NodeId>| {
                assert_eq!(op, UserDataOperation::Renamed);
                assert!(dst.is_none());
                count.set(count.get() + 1);
            },
        );
        let data: UserData = Rc::new(1u8);
        doc.set_user_data(el, "k", Some(data), Some(handler)).unwrap();

        doc.rename_node(el, None, "f").unwrap();
        assert_eq!(renamed.get(), 1);
    }

    #[test]
    fn test_rename_rejections() {
        let mut doc = Document::new();
        let t = doc.create_text_node("t");
        assert!(matches!(
            doc.rename_node(t, None, "x"),
            Err(DomError::NotSupported { .. })
        ));

        let el = doc.create_element("e").unwrap();
        assert!(matches!(
            doc.rename_node(el, None, "a b"),
            Err(DomError::InvalidCharacter { .. })
        ));
        assert!(matches!(
            doc.rename_node(el, Some("urn:x"), "xml:e"),
            Err(DomError::Namespace { .. })
        ));
        doc.set_attribute(el, "a", "1").unwrap();
        doc.set_attribute(el, "b", "2").unwrap();
        let a = doc.get_attribute_node(el, "a").unwrap().unwrap();
        let b = doc.get_attribute_node(el, "b").unwrap().unwrap();
        doc.set_read_only(b, false).unwrap();
        assert_eq!(doc.rename_node(a, None, "b"), Err(DomError::ReadOnly));
        assert_eq!(doc.get_attribute(el, "a").unwrap().as_deref(), Some("1"));

        doc.set_read_only(el, false).unwrap();
        assert_eq!(doc.rename_node(el, None, "f"), Err(DomError::ReadOnly));
        assert_eq!(doc.node_name(el).unwrap(), "e");
    }
}
