//! Title/year/link extraction from poster markup.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::dom::{Document, NodeId, Selector, SelectorError};

static CAPTION_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d{4})\)").expect("caption year pattern is valid"));
static SLUG_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|-)(\d{4})$").expect("slug year pattern is valid"));

const TITLE_ATTRIBUTE: &str = "data-film-name";
const SLUG_ATTRIBUTE: &str = "data-film-slug";
const RELEASE_YEAR_ATTRIBUTE: &str = "data-film-release-year";
const LINK_ATTRIBUTES: [&str; 3] = ["data-target-link", "data-film-link", "data-item-link"];

/// Catalog item identity read off one poster element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosterRecord {
    pub title: String,
    /// Always four ASCII digits.
    pub year: String,
    /// Absolute URL of the item's detail page, when the poster links to one.
    pub resource_url: Option<String>,
}

/// Reads `PosterRecord`s using a fixed fallback chain.
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    caption: Selector,
    nested_poster: Selector,
    nested_image: Selector,
    link: Selector,
    site_base_url: Option<Url>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn four_digit_year(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    (value.len() == 4 && value.bytes().all(|byte| byte.is_ascii_digit()))
        .then(|| value.to_string())
}

impl RecordExtractor {
    pub fn new(site_base_url: &str) -> Result<Self, SelectorError> {
        Ok(Self {
            caption: Selector::parse(".frame-title")?,
            nested_poster: Selector::parse("div[class*=\"film-poster\"]")?,
            nested_image: Selector::parse("img[alt]")?,
            link: Selector::parse("a[href]")?,
            site_base_url: Url::parse(site_base_url).ok(),
        })
    }

    /// Returns `None` unless both a title and a four-digit year are found.
    ///
    /// Title: poster `data-film-name`, then the nested poster's, then the
    /// nested image's `alt`. Year: caption text `"(YYYY)"`, then a slug ending
    /// in `-YYYY`, then the nested poster's `data-film-release-year`.
    pub fn extract(&self, document: &Document, element: NodeId) -> Option<PosterRecord> {
        let nested = document.query_selector(element, &self.nested_poster);

        let title = non_empty(document.attribute(element, TITLE_ATTRIBUTE))
            .or_else(|| nested.and_then(|poster| non_empty(document.attribute(poster, TITLE_ATTRIBUTE))))
            .or_else(|| {
                document
                    .query_selector(element, &self.nested_image)
                    .and_then(|image| non_empty(document.attribute(image, "alt")))
            })?;

        let year = self
            .caption_year(document, element)
            .or_else(|| slug_year(document.attribute(element, SLUG_ATTRIBUTE)))
            .or_else(|| nested.and_then(|poster| slug_year(document.attribute(poster, SLUG_ATTRIBUTE))))
            .or_else(|| {
                four_digit_year(document.attribute(element, RELEASE_YEAR_ATTRIBUTE))
            })
            .or_else(|| {
                nested.and_then(|poster| {
                    four_digit_year(document.attribute(poster, RELEASE_YEAR_ATTRIBUTE))
                })
            })?;

        let resource_url = self.resource_url(document, element, nested);
        Some(PosterRecord {
            title,
            year,
            resource_url,
        })
    }

    fn caption_year(&self, document: &Document, element: NodeId) -> Option<String> {
        let caption = document.query_selector(element, &self.caption)?;
        let text = document.text_content(caption);
        CAPTION_YEAR_RE
            .captures(&text)
            .and_then(|captures| captures.get(1))
            .map(|year| year.as_str().to_string())
    }

    fn resource_url(
        &self,
        document: &Document,
        element: NodeId,
        nested: Option<NodeId>,
    ) -> Option<String> {
        let from_attributes = std::iter::once(element)
            .chain(nested)
            .flat_map(|node| {
                LINK_ATTRIBUTES
                    .iter()
                    .filter_map(move |name| non_empty(document.attribute(node, name)))
            })
            .next();
        let raw = from_attributes.or_else(|| {
            document
                .query_selector(element, &self.link)
                .and_then(|anchor| non_empty(document.attribute(anchor, "href")))
        })?;
        self.resolve(document.location(), &raw)
    }

    fn resolve(&self, location: &str, raw: &str) -> Option<String> {
        let base = Url::parse(location)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .or_else(|| self.site_base_url.clone())?;
        let resolved = base.join(raw).ok()?;
        matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
    }
}

fn slug_year(slug: Option<&str>) -> Option<String> {
    SLUG_YEAR_RE
        .captures(slug?.trim())
        .and_then(|captures| captures.get(1))
        .map(|year| year.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::{PosterRecord, RecordExtractor};
    use crate::dom::{Document, NodeId};

    fn extractor() -> RecordExtractor {
        RecordExtractor::new("https://letterboxd.com").expect("builtin selectors parse")
    }

    fn poster(document: &mut Document, attributes: &[(&str, &str)]) -> NodeId {
        let body = document.body();
        let element = document.create_element("li");
        for (name, value) in attributes {
            document
                .set_attribute(element, name, value)
                .expect("attribute");
        }
        document.append_child(body, element).expect("append poster");
        element
    }

    fn child(document: &mut Document, parent: NodeId, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        let element = document.create_element(tag);
        for (name, value) in attributes {
            document
                .set_attribute(element, name, value)
                .expect("attribute");
        }
        document.append_child(parent, element).expect("append child");
        element
    }

    #[test]
    fn test_caption_year_and_target_link_resolve_against_location() {
        let mut document = Document::new("https://letterboxd.com/films/popular/");
        let element = poster(
            &mut document,
            &[
                ("class", "poster-container"),
                ("data-film-name", "Death Race 2000"),
                ("data-target-link", "/film/death-race-2000/"),
            ],
        );
        let caption = child(&mut document, element, "span", &[("class", "frame-title")]);
        document
            .set_text(caption, "Death Race 2000 (1975)")
            .expect("caption text");

        assert_eq!(
            extractor().extract(&document, element),
            Some(PosterRecord {
                title: "Death Race 2000".to_string(),
                year: "1975".to_string(),
                resource_url: Some("https://letterboxd.com/film/death-race-2000/".to_string()),
            })
        );
    }

    #[test]
    fn test_slug_suffix_supplies_missing_year() {
        let mut document = Document::new("https://letterboxd.com/");
        let element = poster(
            &mut document,
            &[
                ("data-film-name", "Rollerball"),
                ("data-film-slug", "rollerball-1975"),
            ],
        );
        let record = extractor()
            .extract(&document, element)
            .expect("slug year should complete the record");
        assert_eq!(record.year, "1975");
        assert_eq!(record.resource_url, None);
    }

    #[test]
    fn test_nested_poster_attributes_fill_title_and_year() {
        let mut document = Document::new("https://letterboxd.com/");
        let element = poster(&mut document, &[("class", "poster-container")]);
        child(
            &mut document,
            element,
            "div",
            &[
                ("class", "really-lazy-load film-poster"),
                ("data-film-name", "Alien"),
                ("data-film-release-year", "1979"),
                ("data-film-link", "/film/alien/"),
            ],
        );
        let record = extractor()
            .extract(&document, element)
            .expect("nested poster should complete the record");
        assert_eq!(record.title, "Alien");
        assert_eq!(record.year, "1979");
        assert_eq!(
            record.resource_url.as_deref(),
            Some("https://letterboxd.com/film/alien/")
        );
    }

    #[test]
    fn test_missing_year_or_title_yields_none() {
        let mut document = Document::new("https://letterboxd.com/");
        let untitled = poster(&mut document, &[("data-film-slug", "untitled-1999")]);
        let undated = poster(&mut document, &[("data-film-name", "Undated")]);
        let bad_year = poster(
            &mut document,
            &[
                ("data-film-name", "Odd"),
                ("data-film-release-year", "19x9"),
            ],
        );
        let extractor = extractor();
        assert_eq!(extractor.extract(&document, untitled), None);
        assert_eq!(extractor.extract(&document, undated), None);
        assert_eq!(extractor.extract(&document, bad_year), None);
    }

    #[test]
    fn test_image_alt_and_anchor_are_last_resort_sources() {
        let mut document = Document::new("about:blank");
        let element = poster(&mut document, &[("data-film-slug", "heat-1995")]);
        child(&mut document, element, "img", &[("alt", "Heat")]);
        child(&mut document, element, "a", &[("href", "/film/heat-1995/")]);
        let record = extractor()
            .extract(&document, element)
            .expect("alt text should supply the title");
        assert_eq!(record.title, "Heat");
        assert_eq!(
            record.resource_url.as_deref(),
            Some("https://letterboxd.com/film/heat-1995/")
        );
    }
}
