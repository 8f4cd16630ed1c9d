//! CSS selectors over the in-memory document.
//!
//! Parsing goes through `scraper`'s selector grammar; matching runs the
//! `selectors` engine against an element handle on the arena.

use std::fmt;

use scraper::error::SelectorErrorKind;
use scraper::selector::{CssLocalName, CssString, NonTSPseudoClass, Parser, PseudoElement, Simple};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::matching::{
    self, ElementSelectorFlags, IgnoreNthChildForInvalidation, MatchingContext, MatchingMode,
    NeedsSelectorFlags, QuirksMode,
};
use selectors::parser::ParseRelative;
use selectors::{Element, NthIndexCache, OpaqueElement, SelectorImpl, SelectorList};

use super::{Document, NodeId};

type NamespaceUrl = <Simple as SelectorImpl>::NamespaceUrl;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("invalid selector '{selector}': {reason}")]
    Invalid { selector: String, reason: String },
}

/// Parsed selector group.
#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    selectors: SelectorList<Simple>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(SelectorError::Empty);
        }
        let mut input = cssparser::ParserInput::new(source);
        let mut parser = cssparser::Parser::new(&mut input);
        let selectors = SelectorList::parse(&Parser, &mut parser, ParseRelative::No).map_err(
            |err| SelectorError::Invalid {
                selector: source.to_string(),
                reason: SelectorErrorKind::from(err).to_string(),
            },
        )?;
        Ok(Self {
            source: source.to_string(),
            selectors,
        })
    }

    /// Parses every selector in `sources` into one group.
    pub fn parse_group<S: AsRef<str>>(sources: &[S]) -> Result<Self, SelectorError> {
        let joined = sources
            .iter()
            .map(|source| source.as_ref().trim())
            .filter(|source| !source.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        Self::parse(&joined)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub(super) fn matches(&self, document: &Document, node: NodeId) -> bool {
        let mut nth_index_cache = NthIndexCache::default();
        let mut context = MatchingContext::new(
            MatchingMode::Normal,
            None,
            &mut nth_index_cache,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            IgnoreNthChildForInvalidation::No,
        );
        matching::matches_selector_list(&self.selectors, &ElementHandle { document, node }, &mut context)
    }
}

/// Borrowed view of one element, as the matching engine walks the tree.
#[derive(Clone, Copy)]
struct ElementHandle<'a> {
    document: &'a Document,
    node: NodeId,
}

impl fmt::Debug for ElementHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementHandle")
            .field("node", &self.node)
            .field("tag", &self.document.tag(self.node))
            .finish()
    }
}

impl<'a> ElementHandle<'a> {
    fn wrap(document: &'a Document, node: NodeId) -> Option<Self> {
        document
            .is_element(node)
            .then_some(Self { document, node })
    }

    fn sibling_elements(&self) -> (&'a [NodeId], usize) {
        let siblings = self
            .document
            .parent(self.node)
            .map(|parent| self.document.children(parent))
            .unwrap_or(&[]);
        let position = siblings
            .iter()
            .position(|sibling| *sibling == self.node)
            .unwrap_or(0);
        (siblings, position)
    }
}

/// Never matches non-tree-structural pseudo-classes.
impl Element for ElementHandle<'_> {
    type Impl = Simple;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(&self.document.nodes[self.node.0])
    }

    fn parent_element(&self) -> Option<Self> {
        let parent = self.document.parent(self.node)?;
        Self::wrap(self.document, parent)
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        let (siblings, position) = self.sibling_elements();
        siblings[..position]
            .iter()
            .rev()
            .find_map(|sibling| Self::wrap(self.document, *sibling))
    }

    fn next_sibling_element(&self) -> Option<Self> {
        let (siblings, position) = self.sibling_elements();
        siblings
            .get(position + 1..)
            .unwrap_or(&[])
            .iter()
            .find_map(|sibling| Self::wrap(self.document, *sibling))
    }

    fn first_element_child(&self) -> Option<Self> {
        self.document
            .children(self.node)
            .iter()
            .find_map(|child| Self::wrap(self.document, *child))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        true
    }

    fn has_local_name(&self, local_name: &CssLocalName) -> bool {
        self.document.tag(self.node) == Some(&*local_name.0)
    }

    fn has_namespace(&self, namespace: &NamespaceUrl) -> bool {
        &**namespace == HTML_NAMESPACE
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.document.tag(self.node) == other.document.tag(other.node)
    }

    fn attr_matches(
        &self,
        namespace: &NamespaceConstraint<&NamespaceUrl>,
        local_name: &CssLocalName,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        if matches!(namespace, NamespaceConstraint::Specific(url) if !url.is_empty()) {
            return false;
        }
        self.document
            .attribute(self.node, &local_name.0)
            .is_some_and(|value| operation.eval_str(value))
    }

    fn match_non_ts_pseudo_class(
        &self,
        _pseudo_class: &NonTSPseudoClass,
        _context: &mut MatchingContext<'_, Simple>,
    ) -> bool {
        false
    }

    fn match_pseudo_element(
        &self,
        _pseudo_element: &PseudoElement,
        _context: &mut MatchingContext<'_, Simple>,
    ) -> bool {
        false
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn is_link(&self) -> bool {
        matches!(self.document.tag(self.node), Some("a" | "area" | "link"))
            && self.document.attribute(self.node, "href").is_some()
    }

    fn is_html_slot_element(&self) -> bool {
        false
    }

    fn has_id(&self, id: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.document
            .attribute(self.node, "id")
            .is_some_and(|value| case_sensitivity.eq(id.0.as_bytes(), value.as_bytes()))
    }

    fn has_class(&self, name: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.document
            .class_list(self.node)
            .into_iter()
            .any(|class| case_sensitivity.eq(name.0.as_bytes(), class.as_bytes()))
    }

    fn imported_part(&self, _name: &CssLocalName) -> Option<CssLocalName> {
        None
    }

    fn is_part(&self, _name: &CssLocalName) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.document.children(self.node).iter().all(|child| {
            !self.document.is_element(*child)
                && self
                    .document
                    .text(*child)
                    .map_or(true, |text| text.is_empty())
        })
    }

    fn is_root(&self) -> bool {
        self.document.parent(self.node) == Some(self.document.root)
    }
}

#[cfg(test)]
mod tests {
    use super::{Selector, SelectorError};
    use crate::dom::{Document, NodeId};

    fn sample_document() -> (Document, Vec<NodeId>) {
        let mut document = Document::new("https://letterboxd.com/");
        let body = document.body();
        let list = document.create_element("ul");
        document
            .set_attribute(list, "class", "poster-list")
            .expect("class");
        let container = document.create_element("li");
        document
            .set_attribute(container, "class", "poster-container")
            .expect("class");
        let poster = document.create_element("div");
        document
            .set_attribute(poster, "class", "react-component poster film-poster")
            .expect("class");
        document
            .set_attribute(poster, "data-film-slug", "death-race-2000")
            .expect("slug");
        document
            .set_attribute(poster, "data-film-name", "Crouching Tiger, Hidden Dragon [2000]")
            .expect("name");
        document.append_child(body, list).expect("append");
        document.append_child(list, container).expect("append");
        document.append_child(container, poster).expect("append");
        (document, vec![list, container, poster])
    }

    #[test]
    fn test_compound_class_selector_requires_every_class() {
        let (document, nodes) = sample_document();
        let selector =
            Selector::parse(".react-component.poster.film-poster").expect("selector parses");
        assert!(document.matches(nodes[2], &selector));
        let partial = Selector::parse(".react-component.poster.missing").expect("selector parses");
        assert!(!document.matches(nodes[2], &partial));
    }

    #[test]
    fn test_attribute_operators() {
        let (document, nodes) = sample_document();
        for (source, expected) in [
            ("div[class*=\"film-poster\"]", true),
            ("[data-film-slug^=death]", true),
            ("[data-film-slug$='2000']", true),
            ("[data-film-slug=\"death-race-2000\"]", true),
            ("[class~=poster]", true),
            ("[data-film-slug=\"alien\"]", false),
            ("[data-missing]", false),
            ("span[data-film-slug]", false),
        ] {
            let selector = Selector::parse(source).expect("selector parses");
            assert_eq!(document.matches(nodes[2], &selector), expected, "{source}");
        }
    }

    #[test]
    fn test_quoted_attribute_values_may_hold_commas_and_brackets() {
        let (document, nodes) = sample_document();
        let selector =
            Selector::parse("div[data-film-name=\"Crouching Tiger, Hidden Dragon [2000]\"]")
                .expect("selector parses");
        assert!(document.matches(nodes[2], &selector));
        assert_eq!(
            document.query_selector_all(document.root(), &selector),
            vec![nodes[2]]
        );
    }

    #[test]
    fn test_descendant_and_child_combinators() {
        let (document, nodes) = sample_document();
        let descendant = Selector::parse("ul.poster-list .film-poster").expect("parses");
        assert!(document.matches(nodes[2], &descendant));
        let child = Selector::parse("ul > .film-poster").expect("parses");
        assert!(!document.matches(nodes[2], &child));
        let direct = Selector::parse("li.poster-container > div").expect("parses");
        assert!(document.matches(nodes[2], &direct));
    }

    #[test]
    fn test_group_selector_queries_in_document_order() {
        let (document, nodes) = sample_document();
        let group = Selector::parse_group(&[".poster-container", ".react-component.poster"])
            .expect("group parses");
        assert_eq!(
            document.query_selector_all(document.root(), &group),
            vec![nodes[1], nodes[2]]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Selector::parse("  ").err(), Some(SelectorError::Empty));
        for source in ["div > ", "div!", "..poster"] {
            assert!(
                matches!(Selector::parse(source), Err(SelectorError::Invalid { .. })),
                "{source}"
            );
        }
    }
}
