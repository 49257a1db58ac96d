use crate::types::{Result, TeamPageRef};
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info};
use url::Url;

lazy_static! {
    static ref ANCHOR: Selector = Selector::parse("a[href]").unwrap();
}

/// Collect team depth chart links from the index page.
///
/// Every `href` is resolved against `index_url`, the address the page was
/// fetched from; links whose path starts with `path_prefix` are kept, first
/// occurrence wins.
pub fn discover_team_links(index_html: &str, index_url: &str, path_prefix: &str) -> Result<Vec<TeamPageRef>> {
    let base = Url::parse(index_url)?;
    let document = Html::parse_document(index_html);

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in document.select(&ANCHOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };

        let resolved = match base.join(href.trim()) {
            Ok(url) => url,
            Err(e) => {
                debug!("Ignoring unparseable link {:?}: {}", href, e);
                continue;
            }
        };

        if resolved.host_str() != base.host_str() || !resolved.path().starts_with(path_prefix) {
            continue;
        }

        let url = resolved.to_string();
        if seen.insert(url.clone()) {
            links.push(TeamPageRef {
                abbrev_hint: abbrev_from_url(&url),
                url,
            });
        }
    }

    info!("Found {} team pages", links.len());
    Ok(links)
}

/// Upper-cased trailing path segment, e.g. `.../depthchart/NE` -> `NE`.
pub fn abbrev_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_uppercase)
}
