//! HTML import and export for `Document`.

use scraper::{ElementRef, Html, Node};

use super::{Document, NodeData, NodeId, NodeKind};

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose text children are written without escaping.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

impl Document {
    /// Parses a full HTML page into a document located at `location`.
    ///
    /// Comments and doctypes are dropped; the returned document has no
    /// observer attached.
    pub fn parse_html(source: &str, location: impl Into<String>) -> Self {
        let parsed = Html::parse_document(source);
        let mut document = Self::empty(location);
        let root = document.root;
        import_element(&mut document, root, parsed.root_element());
        document
    }

    /// Serializes the subtree below the document root.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root) {
            self.write_node(*child, &mut out);
        }
        out
    }

    /// Serializes one node and its subtree.
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        if let Some(text) = self.text(id) {
            out.push_str(&escape_text(text));
            return;
        }
        let Some(NodeData {
            kind: NodeKind::Element(element),
            children,
            ..
        }) = self.node(id)
        else {
            return;
        };
        out.push('<');
        out.push_str(&element.tag);
        for (name, value) in &element.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attribute(value));
            out.push('"');
        }
        out.push('>');
        if VOID_ELEMENTS.contains(&element.tag.as_str()) {
            return;
        }
        let raw_text = RAW_TEXT_ELEMENTS.contains(&element.tag.as_str());
        for child in children {
            match self.text(*child) {
                Some(text) if raw_text => out.push_str(text),
                _ => self.write_node(*child, out),
            }
        }
        out.push_str("</");
        out.push_str(&element.tag);
        out.push('>');
    }
}

fn import_element(document: &mut Document, parent: NodeId, element: ElementRef<'_>) {
    let node = document.create_element(element.value().name());
    for (name, value) in element.value().attrs() {
        // Fresh nodes are unobserved, so this cannot fail or record.
        let _ = document.set_attribute(node, name, value);
    }
    document.attach(parent, node);

    for child in element.children() {
        match child.value() {
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    import_element(document, node, child_element);
                }
            }
            Node::Text(text) => {
                let text_node = document.create_text(text);
                document.attach(node, text_node);
            }
            _ => {}
        }
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
