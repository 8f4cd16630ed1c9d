//! Action-control destinations.

use crate::settings::SearchMode;

const CATALOG_SEARCH_URL: &str = "https://www.themoviedb.org/search/movie?query=";
const CATEGORY_SEARCH_URL: &str = "https://letterboxd.com/search/films/";
const IMDB_FIND_URL: &str = "https://www.imdb.com/find/?s=tt&ttype=ft&q=";
const WIKIPEDIA_SEARCH_URL: &str = "https://en.wikipedia.org/w/index.php?search=";
const WEB_SEARCH_URL: &str = "https://www.google.com/search?q=";

/// Builds the destination for a poster's action control.
///
/// The query is always `"<title> <year>"`, percent-encoded as a single
/// component.
pub fn build_search_url(title: &str, year: &str, mode: SearchMode) -> String {
    let query = format!("{title} {year}");
    let encoded = urlencoding::encode(&query);
    match mode {
        SearchMode::Search => format!("{CATALOG_SEARCH_URL}{encoded}"),
        SearchMode::Category => format!("{CATEGORY_SEARCH_URL}{encoded}/"),
        SearchMode::Imdb => format!("{IMDB_FIND_URL}{encoded}"),
        SearchMode::Wikipedia => format!("{WIKIPEDIA_SEARCH_URL}{encoded}"),
        SearchMode::WebSearch => format!("{WEB_SEARCH_URL}{encoded}"),
    }
}
