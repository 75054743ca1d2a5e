//! HTML helpers for web-page sources: link extraction, SSRF guard and
//! main-content heuristics.

use std::net::IpAddr;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::parse_date;
use crate::xml::normalize_lines;

static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| sel("a[href]"));
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| sel("h1"));
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| sel("title"));
static BODY_SEL: LazyLock<Selector> = LazyLock::new(|| sel("body"));
static META_SEL: LazyLock<Selector> = LazyLock::new(|| sel("meta[content]"));
static CHROME_SEL: LazyLock<Selector> = LazyLock::new(|| {
    sel("nav, header, footer, aside, script, style, noscript, form, .sidebar, .nav, .breadcrumb, .cookie-banner")
});
static BLOCK_SEL: LazyLock<Selector> =
    LazyLock::new(|| sel("p, li, h1, h2, h3, h4, h5, h6, td, th, dd, dt, pre, blockquote"));

/// Content containers tried in order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &["main", "article", r#"[role="main"]"#, ".content", "#content"];

/// Meta tags carrying a publication or modification date.
const DATE_META: &[&str] = &[
    "dcterms.issued",
    "dcterms.modified",
    "dc.date",
    "article:published_time",
    "article:modified_time",
    "date",
];

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid CSS")
}

/// A hyperlink with its resolved target and anchor text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Link {
    pub url: Url,
    pub text: String,
}

/// Extract all links from a document, resolved against the base URL.
pub(crate) fn extract_links(doc: &Html, base_url: &Url) -> Vec<Link> {
    let mut links = Vec::new();

    for el in doc.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            let text = el.text().collect::<Vec<_>>().join(" ");
            links.push(Link {
                url: resolved,
                text: text.split_whitespace().collect::<Vec<_>>().join(" "),
            });
        }
    }

    links
}

/// Normalize a URL for deduplication (strip fragment and trailing slash).
pub(crate) fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

/// Check if a URL targets a potentially dangerous resource.
pub(crate) fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Page title: first `<h1>`, else `<title>`.
pub(crate) fn page_title(doc: &Html) -> Option<String> {
    [&*H1_SEL, &*TITLE_SEL].into_iter().find_map(|s| {
        doc.select(s)
            .next()
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
    })
}

/// Main text of the page, chrome removed, one block per line.
pub(crate) fn main_text(doc: &Html) -> String {
    let container = CONTENT_SELECTORS
        .iter()
        .find_map(|css| doc.select(&sel(css)).next())
        .or_else(|| doc.select(&BODY_SEL).next());

    let Some(container) = container else {
        return String::new();
    };

    let fragment = Html::parse_fragment(&strip_chrome(&container.inner_html()));
    let blocks: Vec<String> = fragment
        .select(&BLOCK_SEL)
        .filter(|el| !has_block_ancestor(el))
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .collect();

    let text = if blocks.is_empty() {
        fragment.root_element().text().collect::<Vec<_>>().join(" ")
    } else {
        blocks.join("\n")
    };
    normalize_lines(&text)
}

fn has_block_ancestor(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| BLOCK_SEL.matches(&a))
}

/// Strip common navigation/chrome elements from HTML content.
fn strip_chrome(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut result = html.to_string();
    for el in doc.select(&CHROME_SEL) {
        result = result.replace(&el.html(), "");
    }
    result
}

/// Value of the first `<meta>` whose `name` or `property` matches one of
/// `names` (case-insensitive), in the order given.
pub(crate) fn meta_content(doc: &Html, names: &[&str]) -> Option<String> {
    names.iter().find_map(|wanted| {
        doc.select(&META_SEL).find_map(|el| {
            let v = el.value();
            let key = v.attr("name").or_else(|| v.attr("property"))?;
            key.eq_ignore_ascii_case(wanted)
                .then(|| v.attr("content").unwrap_or_default().trim().to_string())
                .filter(|c| !c.is_empty())
        })
    })
}

/// Publication date from the usual meta tags.
pub(crate) fn published_date(doc: &Html) -> Option<chrono::NaiveDate> {
    meta_content(doc, DATE_META).and_then(|d| parse_date(&d))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<html><head>
        <title>Parkeren | Gemeente Voorbeeld</title>
        <meta name="DCTERMS.modified" content="2024-03-01">
        <meta property="og:site_name" content="Voorbeeld">
      </head><body>
        <header><a href="/">Home</a></header>
        <nav><a href="/menu">Menu</a></nav>
        <main>
          <h1>Parkeerbeleid binnenstad</h1>
          <p>Vanaf 2025 gelden nieuwe   tarieven.</p>
          <ul><li>Vergunning <a href="/parkeren/vergunning#aanvragen">aanvragen</a></li></ul>
          <script>track()</script>
        </main>
        <footer>Contact</footer>
      </body></html>"##;

    #[test]
    fn test_extract_links() {
        let doc = Html::parse_document(PAGE);
        let base = Url::parse("https://www.voorbeeld.nl/parkeren").unwrap();
        let links = extract_links(&doc, &base);
        let urls: Vec<String> = links.iter().map(|l| l.url.to_string()).collect();
        assert!(urls.contains(&"https://www.voorbeeld.nl/menu".to_string()));
        assert!(urls.contains(&"https://www.voorbeeld.nl/parkeren/vergunning".to_string()));
        let anchor = links.iter().find(|l| l.url.path() == "/parkeren/vergunning").unwrap();
        assert_eq!(anchor.text, "aanvragen");
    }

    #[test]
    fn test_main_text_skips_chrome() {
        let doc = Html::parse_document(PAGE);
        let text = main_text(&doc);
        assert!(text.starts_with("Parkeerbeleid binnenstad"));
        assert!(text.contains("Vanaf 2025 gelden nieuwe tarieven."));
        assert!(!text.contains("Menu"));
        assert!(!text.contains("track()"));
        assert!(!text.contains("Contact"));
    }

    #[test]
    fn test_title_and_dates() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(page_title(&doc).as_deref(), Some("Parkeerbeleid binnenstad"));
        assert_eq!(published_date(&doc), chrono::NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(meta_content(&doc, &["og:site_name"]).as_deref(), Some("Voorbeeld"));
    }

    #[test]
    fn test_title_falls_back_to_title_tag() {
        let doc = Html::parse_document("<html><head><title> Bestuur </title></head><body></body></html>");
        assert_eq!(page_title(&doc).as_deref(), Some("Bestuur"));
    }

    #[test]
    fn test_ssrf_protection() {
        assert!(is_ssrf_target(&Url::parse("file:///etc/passwd").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://192.168.1.1/admin").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://127.0.0.1:8080/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://localhost:3000/api").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://[::1]/").unwrap()));
        assert!(!is_ssrf_target(&Url::parse("https://www.utrecht.nl/bestuur").unwrap()));
    }

    #[test]
    fn test_normalize_url() {
        let url = Url::parse("https://www.voorbeeld.nl/a/b/#top").unwrap();
        assert_eq!(normalize_url(&url), "https://www.voorbeeld.nl/a/b");
        let root = Url::parse("https://www.voorbeeld.nl/").unwrap();
        assert_eq!(normalize_url(&root), "https://www.voorbeeld.nl/");
    }
}
