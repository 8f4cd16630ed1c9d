//! In-memory host document model.
//!
//! The page the pipeline augments is held in a node arena. Element handles are
//! plain `NodeId` indices, so per-element state elsewhere in the crate lives in
//! side tables keyed by `NodeId` rather than on the nodes themselves.

mod html;
mod selector;

pub use selector::{Selector, SelectorError};

use log::debug;

/// Stable handle to one node of a `Document`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// Errors raised by structural document edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
    #[error("node {0:?} does not belong to this document")]
    UnknownNode(NodeId),
    #[error("cannot insert {child:?} under {parent:?}")]
    HierarchyRequest { parent: NodeId, child: NodeId },
}

#[derive(Debug, Clone)]
struct ElementData {
    tag: String,
    attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Which mutations an attached observer wants to see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverOptions {
    /// Report child insertions and removals.
    pub child_list: bool,
    /// Extend observation from the root to all its descendants.
    pub subtree: bool,
    /// Attribute names to report. `None` disables attribute observation.
    pub attribute_filter: Option<Vec<String>>,
}

/// One observed change, delivered in batches by `Document::take_records`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attributes {
        target: NodeId,
        name: String,
    },
}

#[derive(Debug, Clone)]
struct ObserverRegistration {
    root: NodeId,
    options: ObserverOptions,
}

const DOCUMENT_TAG: &str = "#document";

/// Arena-backed document with a single mutation-observer slot.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
    location: String,
    observer: Option<ObserverRegistration>,
    records: Vec<MutationRecord>,
}

impl Document {
    /// Creates an empty `html > head + body` document at `location`.
    pub fn new(location: impl Into<String>) -> Self {
        let mut document = Self::empty(location);
        let html = document.create_element("html");
        let head = document.create_element("head");
        let body = document.create_element("body");
        let root = document.root;
        document.attach(root, html);
        document.attach(html, head);
        document.attach(html, body);
        document
    }

    fn empty(location: impl Into<String>) -> Self {
        let root = NodeData {
            kind: NodeKind::Element(ElementData {
                tag: DOCUMENT_TAG.to_string(),
                attributes: Vec::new(),
            }),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            location: location.into(),
            observer: None,
            records: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// First `body` element, or the document root when the page has none.
    pub fn body(&self) -> NodeId {
        self.descendants(self.root)
            .into_iter()
            .find(|node| self.tag(*node) == Some("body"))
            .unwrap_or(self.root)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Replaces the current URL without touching the tree, as client-side
    /// routers do.
    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeKind::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeKind::Text(text.to_string()))
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)
    }

    fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.node(id)?.kind {
            NodeKind::Element(element) => Some(element),
            NodeKind::Text(_) => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData, DomError> {
        match self.nodes.get_mut(id.0) {
            Some(NodeData {
                kind: NodeKind::Element(element),
                ..
            }) => Ok(element),
            Some(_) => Err(DomError::NotAnElement(id)),
            None => Err(DomError::UnknownNode(id)),
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id)
            .is_some_and(|element| element.tag != DOCUMENT_TAG)
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|element| element.tag.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Ancestors from the direct parent up to the document root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            ancestors.push(node);
            current = self.parent(node);
        }
        ancestors
    }

    /// Descendants of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    /// Returns `true` when `node` is `ancestor` or sits below it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        node == ancestor || self.ancestors(node).contains(&ancestor)
    }

    /// Returns `true` when the node is reachable from the document root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(self.root, id)
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self, id: NodeId) -> &[(String, String)] {
        self.element(id)
            .map(|element| element.attributes.as_slice())
            .unwrap_or(&[])
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let element = self.element_mut(id)?;
        match element.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, current)) => *current = value.to_string(),
            None => element
                .attributes
                .push((name.to_string(), value.to_string())),
        }
        self.record_attribute(id, name);
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<(), DomError> {
        let element = self.element_mut(id)?;
        let before = element.attributes.len();
        element.attributes.retain(|(key, _)| key != name);
        if element.attributes.len() != before {
            self.record_attribute(id, name);
        }
        Ok(())
    }

    pub fn class_list(&self, id: NodeId) -> Vec<&str> {
        self.attribute(id, "class")
            .map(|classes| classes.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.class_list(id).contains(&class)
    }

    /// Reads one inline style property from the `style` attribute.
    pub fn style(&self, id: NodeId, property: &str) -> Option<String> {
        parse_style(self.attribute(id, "style")?)
            .into_iter()
            .find(|(key, _)| key == property)
            .map(|(_, value)| value)
    }

    /// Writes one inline style property, keeping the others in place.
    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) -> Result<(), DomError> {
        let mut properties = self
            .attribute(id, "style")
            .map(parse_style)
            .unwrap_or_default();
        match properties.iter_mut().find(|(key, _)| key == property) {
            Some((_, current)) => *current = value.to_string(),
            None => properties.push((property.to_string(), value.to_string())),
        }
        let serialized = properties
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("; ");
        self.set_attribute(id, "style", &serialized)
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(NodeData {
            kind: NodeKind::Text(text),
            ..
        }) = self.node(id)
        {
            return text.clone();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|node| match &self.node(node)?.kind {
                NodeKind::Text(text) => Some(text.as_str()),
                NodeKind::Element(_) => None,
            })
            .collect()
    }

    /// Replaces all children of `id` with a single text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        self.element_mut(id)?;
        for child in self.children(id).to_vec() {
            self.remove(child);
        }
        let text_node = self.create_text(text);
        self.append_child(id, text_node)
    }

    /// Appends `child` under `parent`, moving it if it is already attached.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.element_mut(parent)?;
        if self.node(child).is_none() {
            return Err(DomError::UnknownNode(child));
        }
        if child == self.root || self.contains(child, parent) {
            return Err(DomError::HierarchyRequest { parent, child });
        }
        if self.parent(child).is_some() {
            self.remove(child);
        }
        self.attach(parent, child);
        self.record_child_list(parent, vec![child], Vec::new());
        Ok(())
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Detaches `id` from its parent. The node and its subtree stay valid and
    /// can be re-inserted.
    pub fn remove(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        self.nodes[parent.0].children.retain(|child| *child != id);
        self.nodes[id.0].parent = None;
        self.record_child_list(parent, Vec::new(), vec![id]);
    }

    pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        self.is_element(id) && selector.matches(self, id)
    }

    /// Matching descendants of `scope` in document order.
    pub fn query_selector_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|node| self.matches(*node, selector))
            .collect()
    }

    pub fn query_selector(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|node| self.matches(*node, selector))
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|node| self.matches(*node, selector))
    }

    /// Attaches the observer slot, replacing any previous registration and
    /// discarding its undelivered records.
    pub fn observe(&mut self, root: NodeId, options: ObserverOptions) {
        if self.observer.is_some() {
            debug!("Replacing existing mutation observer registration");
        }
        self.records.clear();
        self.observer = Some(ObserverRegistration { root, options });
    }

    pub fn disconnect(&mut self) {
        self.observer = None;
        self.records.clear();
    }

    pub fn is_observing(&self) -> bool {
        self.observer.is_some()
    }

    /// Drains the records queued since the last delivery.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    fn observes(&self, target: NodeId) -> Option<&ObserverOptions> {
        let registration = self.observer.as_ref()?;
        let in_scope = target == registration.root
            || (registration.options.subtree && self.contains(registration.root, target));
        in_scope.then_some(&registration.options)
    }

    fn record_child_list(&mut self, target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) {
        if self.observes(target).is_some_and(|options| options.child_list) {
            self.records.push(MutationRecord::ChildList {
                target,
                added,
                removed,
            });
        }
    }

    fn record_attribute(&mut self, target: NodeId, name: &str) {
        let wanted = self
            .observes(target)
            .and_then(|options| options.attribute_filter.as_ref())
            .is_some_and(|filter| filter.iter().any(|allowed| allowed == name));
        if wanted {
            self.records.push(MutationRecord::Attributes {
                target,
                name: name.to_string(),
            });
        }
    }

    fn text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id)?.kind {
            NodeKind::Text(text) => Some(text),
            NodeKind::Element(_) => None,
        }
    }
}

fn parse_style(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|declaration| {
            let (key, value) = declaration.split_once(':')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}
