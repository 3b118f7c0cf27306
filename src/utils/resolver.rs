use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::REFERER;
use reqwest::Client;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("PDF URL not found in the viewer page")]
    NotFound,
}

/// PDF.js query/fragment parameter: `viewer.html?file=<encoded url>`.
static FILE_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[?&#]file=([^&#]+)").unwrap());

// Script-level patterns probed against the raw page source. The order is
// load-bearing: real viewer pages often carry more than one of these and the
// first hit is the authoritative source.
static PDF_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // viewer.html?file=<encoded url or relative path>
        Regex::new(r"(?i)[?&#]file=([^&#]+)").unwrap(),
        // PDF.js script config: defaultUrl/DEFAULT_URL = '...'
        Regex::new(r#"(?i)(?:defaultUrl|DEFAULT_URL)\s*[:=]\s*['"]([^'"]+\.pdf[^'"]*)['"]"#)
            .unwrap(),
        // PDFViewerApplication.open('...pdf')
        Regex::new(r#"(?i)PDFViewerApplication\.open\(\s*['"]([^'"]+\.pdf[^'"]*)['"]\s*\)"#)
            .unwrap(),
        // window.PDFViewerApplicationOptions.set('defaultUrl', '...')
        Regex::new(
            r#"(?i)PDFViewerApplicationOptions\.set\(\s*['"]defaultUrl['"]\s*,\s*['"]([^'"]+\.pdf[^'"]*)['"]\s*\)"#,
        )
        .unwrap(),
    ]
});

fn percent_decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Turn a matched candidate value into an absolute URL against `base`.
///
/// The value is percent-decoded first; if the decoded value still carries a
/// `file=` parameter (a chained viewer redirect), the inner value wins.
/// Absolute `http(s)`/`data` references are used verbatim, anything else is
/// joined against the base. Parsing through `Url` percent-escapes the result.
fn resolve_candidate(base: &Url, raw: &str) -> Option<Url> {
    if raw.is_empty() {
        return None;
    }
    let mut decoded = percent_decode(raw);
    if let Some(inner) = FILE_PARAM_RE
        .captures(&decoded)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
    {
        decoded = percent_decode(&inner);
    }
    let lowered = decoded.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") || lowered.starts_with("data:")
    {
        Url::parse(&decoded).ok()
    } else {
        base.join(&decoded).ok()
    }
}

fn find_pdf_url_in_dom(base: &Url, html: &str) -> Option<Url> {
    let document = Html::parse_document(html);
    let linkish_selector = Selector::parse("a, link, source").unwrap();
    let meta_selector = Selector::parse("meta").unwrap();
    let any_selector = Selector::parse("*").unwrap();

    // <a href="...pdf"> / <link href="...pdf"> / <source src="...pdf">
    for element in document.select(&linkish_selector) {
        let target = element
            .value()
            .attr("href")
            .or_else(|| element.value().attr("src"));
        if let Some(value) = target {
            if value.to_ascii_lowercase().contains(".pdf") {
                debug!(target: "resolver", value = value, "Link-like attribute matched");
                return resolve_candidate(base, value);
            }
        }
    }

    // <meta content="...pdf">
    for element in document.select(&meta_selector) {
        if let Some(value) = element.value().attr("content") {
            if value.to_ascii_lowercase().contains(".pdf") {
                debug!(target: "resolver", value = value, "Meta content matched");
                return resolve_candidate(base, value);
            }
        }
    }

    // Custom attributes: data-pdf, data-url, data-pdf-url, etc.
    for element in document.select(&any_selector) {
        for (name, value) in element.value().attrs() {
            if value.to_ascii_lowercase().contains(".pdf") {
                debug!(target: "resolver", attr = name, value = value, "Generic attribute matched");
                return resolve_candidate(base, value);
            }
        }
    }

    None
}

/// Search a fetched page for the PDF URL: the script-pattern cascade first,
/// then the DOM attribute scan as a fallback.
pub fn find_pdf_url_in_html(base: &Url, html: &str) -> Option<Url> {
    for (index, pattern) in PDF_PATTERNS.iter().enumerate() {
        if let Some(m) = pattern.captures(html).and_then(|caps| caps.get(1)) {
            debug!(target: "resolver", pattern = index, "Script pattern matched");
            return resolve_candidate(base, m.as_str());
        }
    }
    find_pdf_url_in_dom(base, html)
}

/// Resolution steps that need no network round-trip: a path that already ends
/// in `.pdf`, or a `file=` parameter carried on the input URL itself.
/// Returns `Ok(None)` when the page body has to be fetched to decide.
pub fn resolve_local(input_url: &str) -> Result<Option<Url>, ResolveError> {
    let url = Url::parse(input_url)?;

    if url.path().to_ascii_lowercase().ends_with(".pdf") {
        return Ok(Some(url));
    }

    if let Some(m) = FILE_PARAM_RE.captures(input_url).and_then(|caps| caps.get(1)) {
        let raw = m.as_str().to_string();
        return match resolve_candidate(&url, &raw) {
            Some(resolved) => Ok(Some(resolved)),
            None => Err(ResolveError::NotFound),
        };
    }

    Ok(None)
}

/// Resolve a user-supplied URL to the direct PDF URL behind it.
pub async fn extract_pdf_url(
    client: &Client,
    input_url: &str,
    referer: Option<&str>,
) -> Result<Url, ResolveError> {
    if let Some(resolved) = resolve_local(input_url)? {
        return Ok(resolved);
    }

    let url = Url::parse(input_url)?;
    info!(target: "resolver", url = %url, "Fetching viewer page");
    let mut request = client.get(url);
    if let Some(referer) = referer {
        request = request.header(REFERER, referer);
    }
    let response = request.send().await?.error_for_status()?;

    // Redirects may have moved the page; relative references resolve against
    // the final URL, not the one the user typed.
    let base = response.url().clone();
    let html = response.text().await?;

    find_pdf_url_in_html(&base, &html).ok_or(ResolveError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::{find_pdf_url_in_html, resolve_local};
    use url::Url;

    fn base(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn direct_pdf_url_passes_through() {
        let resolved = resolve_local("https://site.example/docs/report.pdf")
            .unwrap()
            .expect("direct link expected");
        assert_eq!(resolved.as_str(), "https://site.example/docs/report.pdf");
    }

    #[test]
    fn direct_pdf_url_is_percent_escaped() {
        let resolved = resolve_local("https://site.example/docs/annual report.pdf")
            .unwrap()
            .expect("direct link expected");
        assert_eq!(
            resolved.as_str(),
            "https://site.example/docs/annual%20report.pdf"
        );
    }

    #[test]
    fn file_param_on_input_url_is_decoded() {
        let resolved =
            resolve_local("https://host.example/viewer.html?file=https%3A%2F%2Fcdn.example%2Fdoc.pdf")
                .unwrap()
                .expect("file= link expected");
        assert_eq!(resolved.as_str(), "https://cdn.example/doc.pdf");
    }

    #[test]
    fn relative_file_param_resolves_against_input() {
        let resolved = resolve_local("https://host.example/pdfjs/viewer.html?file=%2Fdocs%2Fa.pdf")
            .unwrap()
            .expect("file= link expected");
        assert_eq!(resolved.as_str(), "https://host.example/docs/a.pdf");
    }

    #[test]
    fn file_param_in_fragment_is_honored() {
        let resolved = resolve_local("https://host.example/viewer.html#file=/docs/b.pdf")
            .unwrap()
            .expect("fragment file= expected");
        assert_eq!(resolved.as_str(), "https://host.example/docs/b.pdf");
    }

    #[test]
    fn nested_file_param_takes_inner_value() {
        let resolved = resolve_local(
            "https://host.example/viewer.html?file=inner.html%3Ffile%3D%2Fdocs%2Finner.pdf",
        )
        .unwrap()
        .expect("nested file= expected");
        assert_eq!(resolved.as_str(), "https://host.example/docs/inner.pdf");
    }

    #[test]
    fn viewer_page_without_pdf_hints_needs_fetch() {
        assert!(resolve_local("https://host.example/viewer.html")
            .unwrap()
            .is_none());
    }

    #[test]
    fn invalid_input_url_is_rejected() {
        assert!(resolve_local("not a url").is_err());
    }

    #[test]
    fn options_set_default_url_resolves_relative() {
        let html = r#"<script>
            PDFViewerApplicationOptions.set('defaultUrl', 'docs/report.pdf');
        </script>"#;
        let resolved = find_pdf_url_in_html(&base("https://site.example/viewer/index.html"), html)
            .expect("defaultUrl expected");
        assert_eq!(
            resolved.as_str(),
            "https://site.example/viewer/docs/report.pdf"
        );
    }

    #[test]
    fn default_url_assignment_matches() {
        let html = r#"<script>var DEFAULT_URL = "/files/manual.pdf";</script>"#;
        let resolved = find_pdf_url_in_html(&base("https://site.example/viewer.html"), html)
            .expect("DEFAULT_URL expected");
        assert_eq!(resolved.as_str(), "https://site.example/files/manual.pdf");
    }

    #[test]
    fn viewer_application_open_matches() {
        let html = r#"<script>PDFViewerApplication.open('archive/2020.pdf')</script>"#;
        let resolved = find_pdf_url_in_html(&base("https://site.example/reader/"), html)
            .expect("open() expected");
        assert_eq!(resolved.as_str(), "https://site.example/reader/archive/2020.pdf");
    }

    #[test]
    fn file_param_in_page_source_wins_over_dom() {
        let html = r#"
            <iframe src="/pdfjs/viewer.html?file=/docs/from-script.pdf&zoom=auto"></iframe>
            <a href="/docs/from-anchor.pdf">download</a>
        "#;
        let resolved = find_pdf_url_in_html(&base("https://site.example/page"), html)
            .expect("script pattern expected");
        assert_eq!(resolved.as_str(), "https://site.example/docs/from-script.pdf");
    }

    #[test]
    fn dom_anchor_fallback() {
        let html = r#"<html><body><p>Read it:</p><a href="files/x.pdf">x</a></body></html>"#;
        let resolved = find_pdf_url_in_html(&base("https://site.example/library/"), html)
            .expect("anchor expected");
        assert_eq!(resolved.as_str(), "https://site.example/library/files/x.pdf");
    }

    #[test]
    fn dom_meta_fallback() {
        let html =
            r#"<html><head><meta name="citation_pdf_url" content="/papers/p1.pdf"></head></html>"#;
        let resolved = find_pdf_url_in_html(&base("https://journal.example/article/1"), html)
            .expect("meta expected");
        assert_eq!(resolved.as_str(), "https://journal.example/papers/p1.pdf");
    }

    #[test]
    fn dom_generic_attribute_fallback() {
        let html = r#"<html><body><div data-pdf-url="/assets/spec.pdf">viewer</div></body></html>"#;
        let resolved = find_pdf_url_in_html(&base("https://site.example/embed"), html)
            .expect("data attribute expected");
        assert_eq!(resolved.as_str(), "https://site.example/assets/spec.pdf");
    }

    #[test]
    fn anchor_beats_meta_and_generic_attributes() {
        let html = r#"<html><head><meta content="/meta.pdf"></head>
            <body><div data-x="/generic.pdf"></div><a href="/anchor.pdf">a</a></body></html>"#;
        let resolved = find_pdf_url_in_html(&base("https://site.example/"), html)
            .expect("anchor expected");
        assert_eq!(resolved.as_str(), "https://site.example/anchor.pdf");
    }

    #[test]
    fn data_url_candidate_is_kept_verbatim() {
        let resolved =
            resolve_local("https://host.example/viewer.html?file=data:application/pdf;base64,JVBERi0")
                .unwrap()
                .expect("data url expected");
        assert_eq!(resolved.scheme(), "data");
    }

    #[test]
    fn page_without_pdf_reference_yields_none() {
        let html = r#"<html><body><a href="/about.html">about</a></body></html>"#;
        assert!(find_pdf_url_in_html(&base("https://site.example/"), html).is_none());
    }
}
