//! Overlay construction for poster elements.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::dom::{Document, DomError, NodeId, Selector, SelectorError};
use crate::poster_record::{PosterRecord, RecordExtractor};
use crate::search_url::build_search_url;
use crate::settings::Settings;

/// Class carried by every overlay root; presence on a direct child marks a
/// poster as already decorated.
pub const OVERLAY_CLASS: &str = "poster-controls";
pub const INFO_STRIP_CLASS: &str = "poster-info";
pub const YEAR_CLASS: &str = "poster-year";
pub const ACTION_CLASS: &str = "export-link";
pub const ACTION_TITLE_ATTRIBUTE: &str = "data-movie-title";
pub const ACTION_YEAR_ATTRIBUTE: &str = "data-release-year";
const ACTION_GLYPH: &str = "\u{2197}";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("poster {0:?} is no longer attached to the document")]
    Detached(NodeId),
    #[error(transparent)]
    Dom(#[from] DomError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(PosterRecord),
    /// Missing data or an excluded container; nothing was touched.
    Skipped,
}

/// Builds overlays and remembers every poster that produced a valid record.
pub struct PosterRenderer {
    extractor: RecordExtractor,
    excluded_ancestors: Option<Selector>,
    rendered: BTreeMap<NodeId, PosterRecord>,
}

impl PosterRenderer {
    pub fn new(extractor: RecordExtractor, excluded_ancestors: &[String]) -> Result<Self, SelectorError> {
        let excluded_ancestors = if excluded_ancestors.is_empty() {
            None
        } else {
            Some(Selector::parse_group(excluded_ancestors)?)
        };
        Ok(Self {
            extractor,
            excluded_ancestors,
            rendered: BTreeMap::new(),
        })
    }

    /// Extracts a record and (re)builds the overlay. An existing overlay is
    /// replaced, never duplicated.
    pub fn render(
        &mut self,
        document: &mut Document,
        element: NodeId,
        settings: &Settings,
    ) -> Result<RenderOutcome, RenderError> {
        if !document.is_connected(element) {
            return Err(RenderError::Detached(element));
        }
        if let Some(excluded) = &self.excluded_ancestors {
            if document.closest(element, excluded).is_some() {
                debug!("Poster {:?} sits in an excluded list; skipping", element);
                return Ok(RenderOutcome::Skipped);
            }
        }
        let Some(record) = self.extractor.extract(document, element) else {
            debug!("Poster {:?} has no usable title/year; skipping", element);
            return Ok(RenderOutcome::Skipped);
        };
        build_overlay(document, element, &record, settings)?;
        self.rendered.insert(element, record.clone());
        Ok(RenderOutcome::Rendered(record))
    }

    /// Rebuilds every remembered overlay from its stored record, without
    /// re-reading the page. Returns how many overlays were rebuilt.
    pub fn rerender_all(&mut self, document: &mut Document, settings: &Settings) -> usize {
        let mut rebuilt = 0;
        let mut detached = Vec::new();
        for (element, record) in &self.rendered {
            if !document.is_connected(*element) {
                detached.push(*element);
                continue;
            }
            match build_overlay(document, *element, record, settings) {
                Ok(()) => rebuilt += 1,
                Err(err) => warn!("Failed to re-render poster {:?}: {}", element, err),
            }
        }
        for element in detached {
            self.forget(element);
        }
        rebuilt
    }

    pub fn record(&self, element: NodeId) -> Option<&PosterRecord> {
        self.rendered.get(&element)
    }

    pub fn forget(&mut self, element: NodeId) -> Option<PosterRecord> {
        self.rendered.remove(&element)
    }

    pub fn rendered_elements(&self) -> Vec<NodeId> {
        self.rendered.keys().copied().collect()
    }

    pub fn rendered_count(&self) -> usize {
        self.rendered.len()
    }

    pub fn clear(&mut self) {
        self.rendered.clear();
    }
}

/// Direct overlay children of `element`.
pub fn overlays_of(document: &Document, element: NodeId) -> Vec<NodeId> {
    document
        .children(element)
        .iter()
        .copied()
        .filter(|child| document.has_class(*child, OVERLAY_CLASS))
        .collect()
}

pub fn has_overlay(document: &Document, element: NodeId) -> bool {
    !overlays_of(document, element).is_empty()
}

pub fn remove_overlay(document: &mut Document, element: NodeId) {
    for overlay in overlays_of(document, element) {
        document.remove(overlay);
    }
}

/// rgba background for the info strip at `opacity` percent.
pub fn strip_background(opacity: u8) -> String {
    format!("rgba(0, 0, 0, {})", f64::from(opacity.min(100)) / 100.0)
}

fn set_styles(document: &mut Document, element: NodeId, styles: &[(&str, &str)]) -> Result<(), DomError> {
    for (property, value) in styles {
        document.set_style(element, property, value)?;
    }
    Ok(())
}

fn build_overlay(
    document: &mut Document,
    element: NodeId,
    record: &PosterRecord,
    settings: &Settings,
) -> Result<(), DomError> {
    remove_overlay(document, element);

    let overlay = document.create_element("div");
    document.set_attribute(overlay, "class", OVERLAY_CLASS)?;
    set_styles(
        document,
        overlay,
        &[
            ("position", "absolute"),
            ("top", "0"),
            ("left", "0"),
            ("width", "100%"),
            ("height", "100%"),
            ("z-index", "2"),
            ("pointer-events", "none"),
        ],
    )?;

    let strip = document.create_element("div");
    document.set_attribute(strip, "class", INFO_STRIP_CLASS)?;
    let background = strip_background(settings.opacity);
    set_styles(
        document,
        strip,
        &[
            ("position", "absolute"),
            ("top", "5px"),
            ("left", "5px"),
            ("display", "flex"),
            ("flex-flow", "row nowrap"),
            ("align-items", "center"),
            ("gap", "4px"),
            ("background", &background),
            ("color", "#fff"),
            ("padding", "2px 5px"),
            ("pointer-events", "auto"),
        ],
    )?;
    document.append_child(overlay, strip)?;

    let year = document.create_element("span");
    document.set_attribute(year, "class", YEAR_CLASS)?;
    document.set_text(year, &record.year)?;
    document.append_child(strip, year)?;

    if settings.show_action {
        let action = document.create_element("a");
        document.set_attribute(action, "class", ACTION_CLASS)?;
        document.set_attribute(action, ACTION_TITLE_ATTRIBUTE, &record.title)?;
        document.set_attribute(action, ACTION_YEAR_ATTRIBUTE, &record.year)?;
        document.set_attribute(
            action,
            "href",
            &build_search_url(&record.title, &record.year, settings.mode),
        )?;
        document.set_attribute(action, "target", "_blank")?;
        document.set_attribute(action, "rel", "noopener noreferrer")?;
        set_styles(
            document,
            action,
            &[
                ("background", "transparent"),
                ("color", "#fff"),
                ("border", "none"),
                ("padding", "0"),
                ("cursor", "pointer"),
                ("font-size", "1.3rem"),
                ("text-decoration", "none"),
                ("display", "inline-block"),
            ],
        )?;
        document.set_text(action, ACTION_GLYPH)?;
        document.append_child(strip, action)?;
    }

    document.set_style(element, "position", "relative")?;
    document.append_child(element, overlay)?;
    Ok(())
}
