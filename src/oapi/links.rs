//! Link rewriting and navigation helpers for OGC API Features responses.
//!
//! Backend documents embed the internal server URLs; every `links` array in
//! the response tree is rewritten to the public proxy paths. HTML views
//! additionally get page-size shortcuts and a bounded pagination strip.

use serde_json::{json, Value};

/// Rewrites backend hrefs in `links` arrays to public proxy paths.
pub struct LinkRewriter<'a> {
    /// Backend OGC API Features root, without a trailing slash.
    pub oapi_backend_url: &'a str,
    /// Backend origin (scheme and authority, empty path).
    pub root_backend_url: &'a str,
    /// Public path of the service's API root.
    pub public_root: &'a str,
    /// Public path of the service's OWS endpoint.
    pub ogc_public_path: &'a str,
    /// The client asked for an HTML-rendered view.
    pub html_format: bool,
}

impl LinkRewriter<'_> {
    /// Walk the whole JSON tree and rewrite every `links` array in place.
    pub fn rewrite(&self, value: &mut Value) {
        match value {
            Value::Array(entries) => {
                for entry in entries {
                    self.rewrite(entry);
                }
            }
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if key == "links" {
                        if let Value::Array(links) = child {
                            for link in links {
                                self.rewrite_link(link);
                            }
                            continue;
                        }
                    }
                    if child.is_array() || child.is_object() {
                        self.rewrite(child);
                    }
                }
            }
            _ => {}
        }
    }

    fn rewrite_link(&self, link: &mut Value) {
        let Some(href) = link.get("href").and_then(Value::as_str) else {
            return;
        };

        let mut href = href.to_string();
        if let Some(rest) = href.strip_prefix(self.oapi_backend_url) {
            let mut api_path = rest.trim_start_matches('/');
            // QGIS Server advertises .html alternates we never serve directly
            api_path = api_path.strip_suffix(".html").unwrap_or(api_path);
            href = public_path(self.public_root, api_path);
        } else {
            let ows_prefix = format!("{}/?", self.root_backend_url);
            if let Some(query) = href.strip_prefix(&ows_prefix) {
                href = format!("{}?{}", self.ogc_public_path, query);
            }
        }

        // avoid double-quoted links
        if let Ok(decoded) = urlencoding::decode(&href) {
            href = decoded.into_owned();
        }

        if self.html_format {
            // The backend was queried for .json, so its rel=self points at
            // JSON while the view being served is HTML. Swap the two.
            match link.get("rel").and_then(Value::as_str) {
                Some("alternate") => {
                    link["rel"] = Value::String("self".to_string());
                }
                Some("self") => {
                    link["rel"] = Value::String("alternate".to_string());
                }
                Some("prev" | "next" | "first" | "last") => {
                    href = strip_format_suffix(&href);
                }
                _ => {}
            }
        }

        link["href"] = Value::String(href);
    }
}

/// Join a public root path with an API sub-path.
pub fn public_path(public_root: &str, api_path: &str) -> String {
    let trimmed = api_path.trim_matches('/');
    if trimmed.is_empty() {
        public_root.to_string()
    } else {
        format!("{}/{}", public_root, trimmed)
    }
}

/// Drop a `.json`/`.geojson` extension from the path portion of a URL.
fn strip_format_suffix(href: &str) -> String {
    let (path, query) = match href.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (href, None),
    };
    let path = path
        .strip_suffix(".json")
        .or_else(|| path.strip_suffix(".geojson"))
        .unwrap_or(path);
    match query {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    }
}

/// Current request URL with `limit`/`offset` removed from the query and a
/// trailing `?` or `&`, ready for appending pagination parameters.
pub fn cleaned_query_url(url: &str) -> String {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    };
    let filtered: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key != "limit" && key != "offset")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if filtered.is_empty() {
        format!("{}?", path)
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer.extend_pairs(filtered);
        format!("{}?{}&", path, serializer.finish())
    }
}

/// Page-size shortcut entries for the HTML view.
pub fn page_size_links(cleaned_url: &str, number_matched: u64, max_limit: u64) -> Vec<Value> {
    let mut entries = Vec::new();
    for count in [1u64, 10, 20, 50, 100, 1000] {
        if number_matched > count && max_limit > count {
            entries.push(json!({
                "title": count.to_string(),
                "href": format!("{}offset=0&limit={}", cleaned_url, count),
            }));
        }
    }
    let title = if max_limit < number_matched {
        "Maximum"
    } else {
        "All"
    };
    entries.push(json!({
        "title": title,
        "href": format!("{}offset=0&limit={}", cleaned_url, max_limit),
    }));
    entries
}

/// Bounded pagination strip: first, up to one neighbour on either side of the
/// current page, ellipses for gaps wider than one page, and last.
pub fn pagination_links(
    cleaned_url: &str,
    self_href: &str,
    number_matched: u64,
    limit: u64,
    offset: u64,
) -> Vec<Value> {
    let mut entries = Vec::new();
    if limit == 0 || number_matched <= limit {
        return entries;
    }

    let total_pages = number_matched.div_ceil(limit);
    let current_page = offset / limit + 1;

    let page_href = |page_offset: u64| format!("{}offset={}&limit={}", cleaned_url, page_offset, limit);

    if current_page != 1 {
        entries.push(json!({
            "title": "1",
            "href": page_href(0),
            "class": "page-item",
        }));
    }
    if current_page > 3 {
        entries.push(json!({"title": "\u{2026}", "class": "page-item disabled"}));
    }
    if current_page > 2 {
        entries.push(json!({
            "title": (current_page - 1).to_string(),
            "href": page_href(offset.saturating_sub(limit)),
            "class": "page-item",
        }));
    }
    entries.push(json!({
        "title": current_page.to_string(),
        "href": self_href,
        "class": "page-item active",
    }));
    if current_page + 1 < total_pages {
        entries.push(json!({
            "title": (current_page + 1).to_string(),
            "href": page_href((offset + limit).min(number_matched)),
            "class": "page-item",
        }));
    }
    if current_page + 2 < total_pages {
        entries.push(json!({"title": "\u{2026}", "class": "page-item disabled"}));
    }
    if current_page != total_pages {
        entries.push(json!({
            "title": total_pages.to_string(),
            "href": page_href(total_pages * limit - limit),
            "class": "page-item",
        }));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter(html_format: bool) -> LinkRewriter<'static> {
        LinkRewriter {
            oapi_backend_url: "http://localhost:8001/wfs3",
            root_backend_url: "http://localhost:8001",
            public_root: "/api/qwc_demo/features",
            ogc_public_path: "/ows/qwc_demo",
            html_format,
        }
    }

    #[test]
    fn backend_links_become_public_paths() {
        let mut doc = json!({
            "links": [
                {"href": "http://localhost:8001/wfs3/collections/edit_points", "rel": "data"},
                {"href": "http://localhost:8001/wfs3/index.html", "rel": "alternate"},
                {"href": "http://localhost:8001/?SERVICE=WMS&REQUEST=GetCapabilities", "rel": "wms"},
                {"href": "http://elsewhere.example/doc", "rel": "describedby"}
            ]
        });
        rewriter(false).rewrite(&mut doc);
        let links = doc["links"].as_array().unwrap();
        assert_eq!(links[0]["href"], "/api/qwc_demo/features/collections/edit_points");
        assert_eq!(links[1]["href"], "/api/qwc_demo/features/index");
        assert_eq!(
            links[2]["href"],
            "/ows/qwc_demo?SERVICE=WMS&REQUEST=GetCapabilities"
        );
        assert_eq!(links[3]["href"], "http://elsewhere.example/doc");
    }

    #[test]
    fn nested_links_are_rewritten() {
        let mut doc = json!({
            "collections": [
                {"id": "a", "links": [{"href": "http://localhost:8001/wfs3/collections/a", "rel": "self"}]}
            ]
        });
        rewriter(false).rewrite(&mut doc);
        assert_eq!(
            doc["collections"][0]["links"][0]["href"],
            "/api/qwc_demo/features/collections/a"
        );
    }

    #[test]
    fn html_view_swaps_self_and_alternate() {
        let mut doc = json!({
            "links": [
                {"href": "http://localhost:8001/wfs3/collections.json", "rel": "self"},
                {"href": "http://localhost:8001/wfs3/collections.html", "rel": "alternate"},
                {"href": "http://localhost:8001/wfs3/collections/a/items.json?offset=10", "rel": "next"}
            ]
        });
        rewriter(true).rewrite(&mut doc);
        let links = doc["links"].as_array().unwrap();
        assert_eq!(links[0]["rel"], "alternate");
        assert_eq!(links[1]["rel"], "self");
        // navigation links lose their format extension
        assert_eq!(
            links[2]["href"],
            "/api/qwc_demo/features/collections/a/items?offset=10"
        );
    }

    #[test]
    fn cleaned_url_drops_paging_params() {
        assert_eq!(
            cleaned_query_url("/api/x/features/collections/a/items?limit=10&offset=20&bbox=1,2,3,4"),
            "/api/x/features/collections/a/items?bbox=1%2C2%2C3%2C4&"
        );
        assert_eq!(
            cleaned_query_url("/api/x/features/collections/a/items?limit=10"),
            "/api/x/features/collections/a/items?"
        );
    }

    #[test]
    fn page_size_shortcuts_respect_limits() {
        let entries = page_size_links("/items?", 120, 100);
        let titles: Vec<&str> = entries
            .iter()
            .map(|e| e["title"].as_str().unwrap())
            .collect();
        // 100 is excluded since max_limit is not greater than it
        assert_eq!(titles, vec!["1", "10", "20", "50", "Maximum"]);
        assert_eq!(entries[4]["href"], "/items?offset=0&limit=100");

        let entries = page_size_links("/items?", 30, 10000);
        let titles: Vec<&str> = entries
            .iter()
            .map(|e| e["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["1", "10", "20", "All"]);
    }

    #[test]
    fn pagination_strip_is_bounded() {
        // 100 features, 10 per page, on page 5
        let entries = pagination_links("/items?", "/items?offset=40&limit=10", 100, 10, 40);
        let titles: Vec<&str> = entries
            .iter()
            .map(|e| e["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["1", "\u{2026}", "4", "5", "6", "\u{2026}", "10"]);
        assert_eq!(entries[3]["class"], "page-item active");
        assert_eq!(entries[2]["href"], "/items?offset=30&limit=10");
        assert_eq!(entries[6]["href"], "/items?offset=90&limit=10");
    }

    #[test]
    fn pagination_absent_when_everything_fits() {
        assert!(pagination_links("/items?", "/items", 10, 10, 0).is_empty());
        assert!(pagination_links("/items?", "/items", 10, 0, 0).is_empty());
    }

    #[test]
    fn first_page_has_no_leading_entries() {
        let entries = pagination_links("/items?", "/items?limit=10", 25, 10, 0);
        let titles: Vec<&str> = entries
            .iter()
            .map(|e| e["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["1", "2", "3"]);
        assert_eq!(entries[0]["class"], "page-item active");
    }
}
