use anyhow::{Result, anyhow, Context};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;
use url::Url;

use crate::cli::config::ExtractorSettings;
use crate::extract::document::{ExtractedDocument, PageMeta};
use crate::utils::domain::{domain_of_host, host_matches, normalize_page_url, site_root};

/// Elements whose text is layout noise rather than content
const NOISE_ELEMENTS: &[&str] = &["script", "style", "nav", "footer", "header"];

/// Known social platforms: host -> platform name
const SOCIAL_PLATFORMS: &[(&str, &str)] = &[
    ("facebook.com", "facebook"),
    ("twitter.com", "twitter"),
    ("x.com", "twitter"),
    ("instagram.com", "instagram"),
    ("linkedin.com", "linkedin"),
    ("youtube.com", "youtube"),
    ("youtu.be", "youtube"),
];

/// Matches of the email pattern that are really asset names (logo@2x.png)
const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

const EMAIL_PATTERN: &str = r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}";

/// Spanish landline/mobile numbers with an optional country prefix
const PHONE_PATTERN: &str = r"(?:\+\d{2,3}[\s.-]?)?[6789]\d{2}(?:[\s.-]?\d{2,3}){2,3}";

/// Pure HTML-to-signals extractor. Holds compiled patterns only.
pub struct Extractor {
    settings: ExtractorSettings,
    email_re: Regex,
    phone_re: Regex,
    anchor_sel: Selector,
    title_sel: Selector,
    meta_sel: Selector,
}

impl Extractor {
    pub fn new(settings: ExtractorSettings) -> Result<Self> {
        let selector = |css: &str| Selector::parse(css).map_err(|e| anyhow!("Invalid selector '{}': {:?}", css, e));

        Ok(Self {
            email_re: Regex::new(EMAIL_PATTERN).context("Invalid email pattern")?,
            phone_re: Regex::new(PHONE_PATTERN).context("Invalid phone pattern")?,
            anchor_sel: selector("a[href]")?,
            title_sel: selector("title")?,
            meta_sel: selector("meta")?,
            settings,
        })
    }

    /// Parse a fetched document. Never fails: missing or malformed pieces
    /// produce empty fields.
    pub fn parse(&self, document: &[u8], base_url: &str) -> ExtractedDocument {
        let html = String::from_utf8_lossy(document);
        let dom = Html::parse_document(&html);
        let base = Url::parse(base_url).ok();

        let hrefs: Vec<String> = dom
            .select(&self.anchor_sel)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| href.trim().to_string())
            .filter(|href| !href.is_empty())
            .collect();

        // Emails and phones also appear in footers, so match over everything
        let all_text = dom.root_element().text().collect::<Vec<_>>().join(" ");

        let (internal_links, external_links) = self.partition_links(&hrefs, base.as_ref());

        let doc = ExtractedDocument {
            base_url: base_url.to_string(),
            secure: base.as_ref().map_or(false, |u| u.scheme() == "https"),
            meta: self.extract_meta(&dom),
            emails: self.extract_emails(&all_text, &hrefs),
            phones: self.extract_phones(&all_text, &hrefs),
            social: extract_social(&hrefs, base.as_ref()),
            text: self.extract_text(&dom),
            internal_links,
            external_links,
        };

        debug!(
            "Parsed {}: {} emails, {} phones, {} social, {} internal, {} external",
            base_url,
            doc.emails.len(),
            doc.phones.len(),
            doc.social.len(),
            doc.internal_links.len(),
            doc.external_links.len()
        );

        doc
    }

    fn extract_meta(&self, dom: &Html) -> PageMeta {
        let mut meta = PageMeta {
            title: dom
                .select(&self.title_sel)
                .next()
                .map(|t| collapse_whitespace(&t.text().collect::<String>()))
                .unwrap_or_default(),
            ..PageMeta::default()
        };

        for tag in dom.select(&self.meta_sel) {
            let el = tag.value();
            let key = el
                .attr("name")
                .or_else(|| el.attr("property"))
                .map(|k| k.trim().to_lowercase());
            let content = el.attr("content").map(collapse_whitespace).unwrap_or_default();

            let slot = match key.as_deref() {
                Some("description") => &mut meta.description,
                Some("keywords") => &mut meta.keywords,
                Some("og:title") => &mut meta.og_title,
                Some("og:description") => &mut meta.og_description,
                _ => continue,
            };
            if slot.is_empty() {
                *slot = content;
            }
        }

        meta
    }

    fn extract_emails(&self, text: &str, hrefs: &[String]) -> Vec<String> {
        let mut emails = BTreeSet::new();

        for m in self.email_re.find_iter(text) {
            let email = m.as_str().trim_end_matches('.').to_lowercase();
            if !ASSET_SUFFIXES.iter().any(|s| email.ends_with(s)) {
                emails.insert(email);
            }
        }

        for href in hrefs {
            if let Some(target) = strip_scheme(href, "mailto:") {
                let target = percent_decode(target);
                let addresses = target.split('?').next().unwrap_or_default();
                for address in addresses.split(',') {
                    let address = address.trim().to_lowercase();
                    if address.contains('@') {
                        emails.insert(address);
                    }
                }
            }
        }

        emails.into_iter().collect()
    }

    fn extract_phones(&self, text: &str, hrefs: &[String]) -> Vec<String> {
        let mut phones = BTreeSet::new();

        for m in self.phone_re.find_iter(text) {
            if let Some(phone) = normalize_phone(m.as_str(), 9) {
                phones.insert(phone);
            }
        }

        for href in hrefs {
            // Link targets are kept whatever their length
            if let Some(target) = strip_scheme(href, "tel:") {
                let phone = strip_phone_separators(&percent_decode(target));
                if !phone.is_empty() {
                    phones.insert(phone);
                }
            }
        }

        phones.into_iter().collect()
    }

    fn extract_text(&self, dom: &Html) -> String {
        let mut raw = String::new();
        collect_text(dom.root_element(), &mut raw);
        collapse_whitespace(&raw)
            .chars()
            .take(self.settings.max_text_chars)
            .collect()
    }

    fn partition_links(&self, hrefs: &[String], base: Option<&Url>) -> (Vec<String>, Vec<String>) {
        let Some(base) = base else {
            return (Vec::new(), Vec::new());
        };
        let Some(base_domain) = base.host_str().map(domain_of_host) else {
            return (Vec::new(), Vec::new());
        };

        let mut internal = UniqueList::new(self.settings.max_internal_links);
        let mut external = UniqueList::new(self.settings.max_external_links);

        for href in hrefs {
            let Ok(url) = base.join(href) else { continue };
            if url.scheme() != "http" && url.scheme() != "https" {
                continue;
            }
            let Some(host) = url.host_str() else { continue };

            if domain_of_host(host) == base_domain {
                if let Some(link) = normalize_page_url(&url) {
                    internal.push(link);
                }
            } else if !self.is_blocked(host) {
                if let Some(root) = site_root(&url) {
                    external.push(root);
                }
            }
        }

        (internal.into_vec(), external.into_vec())
    }

    fn is_blocked(&self, host: &str) -> bool {
        self.settings
            .blocked_domains
            .iter()
            .any(|blocked| host_matches(host, blocked))
    }
}

/// First profile link per known platform
fn extract_social(hrefs: &[String], base: Option<&Url>) -> BTreeMap<String, String> {
    let mut social = BTreeMap::new();

    for href in hrefs {
        let url = match base {
            Some(base) => base.join(href).ok(),
            None => Url::parse(href).ok(),
        };
        let Some(url) = url else { continue };
        let Some(host) = url.host_str() else { continue };

        if let Some((_, name)) = SOCIAL_PLATFORMS.iter().find(|(domain, _)| host_matches(host, domain)) {
            social.entry(name.to_string()).or_insert_with(|| url.to_string());
        }
    }

    social
}

/// Walk the tree, skipping noise elements, appending text nodes
fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if !NOISE_ELEMENTS.contains(&child_el.value().name()) {
                collect_text(child_el, out);
            }
        } else if let Node::Text(text) = child.value() {
            out.push_str(text);
            out.push(' ');
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_scheme<'a>(href: &'a str, scheme: &str) -> Option<&'a str> {
    match href.get(..scheme.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(scheme) => Some(&href[scheme.len()..]),
        _ => None,
    }
}

fn percent_decode(target: &str) -> String {
    match urlencoding::decode(target) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => target.to_string(),
    }
}

fn strip_phone_separators(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '.' | '(' | ')' | '/'))
        .collect()
}

/// Keep a leading '+' and the digits; reject implausible lengths
fn normalize_phone(raw: &str, min_digits: usize) -> Option<String> {
    let raw = raw.trim();
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < min_digits || digits.len() > 15 {
        return None;
    }
    if raw.starts_with('+') {
        Some(format!("+{}", digits))
    } else {
        Some(digits)
    }
}

/// Insertion-ordered, deduplicated, capped list
struct UniqueList {
    items: Vec<String>,
    seen: HashSet<String>,
    cap: usize,
}

impl UniqueList {
    fn new(cap: usize) -> Self {
        Self { items: Vec::new(), seen: HashSet::new(), cap }
    }

    fn push(&mut self, item: String) {
        if self.items.len() < self.cap && self.seen.insert(item.clone()) {
            self.items.push(item);
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::domain::domain_key;

    fn extractor() -> Extractor {
        Extractor::new(ExtractorSettings::default()).unwrap()
    }

    const EMPRESA_HTML: &str = r#"
        <html>
            <head>
                <title>Empresa S.L.</title>
                <meta name="description" content="Servicios de comunicación en Tenerife">
                <meta name="keywords" content="prensa, medios">
                <meta property="og:title" content="Empresa OG">
            </head>
            <body>
                <header><p>Menu principal</p></header>
                <nav><a href="/servicios">Servicios</a></nav>
                <main>
                    <p>Bienvenidos a   Empresa.</p>
                    <a href="mailto:info@empresa.example">Escríbenos</a>
                    <a href="tel:+34600000000">Llámanos</a>
                    <a href="https://facebook.com/empresa">Facebook</a>
                    <a href="https://www.facebook.com/otra">Otra</a>
                    <a href="https://proveedor.example/productos?id=3">Proveedor</a>
                    <a href="/contacto/#form">Contacto</a>
                </main>
                <script>var tracking = "should not appear";</script>
                <footer>Contacto: info@empresa.example, +34 600 000 000</footer>
            </body>
        </html>
    "#;

    #[test]
    fn test_end_to_end_fixture() {
        let doc = extractor().parse(EMPRESA_HTML.as_bytes(), "https://empresa.example/");

        assert_eq!(doc.meta.title, "Empresa S.L.");
        assert_eq!(doc.meta.description, "Servicios de comunicación en Tenerife");
        assert_eq!(doc.meta.keywords, "prensa, medios");
        assert_eq!(doc.meta.og_title, "Empresa OG");
        assert_eq!(doc.meta.og_description, "");

        assert_eq!(doc.emails, vec!["info@empresa.example".to_string()]);
        assert_eq!(doc.phones, vec!["+34600000000".to_string()]);

        assert_eq!(doc.social.get("facebook").map(String::as_str), Some("https://facebook.com/empresa"));
        assert!(doc.external_links.iter().all(|l| !l.contains("facebook.com")));
        assert_eq!(doc.external_links, vec!["https://proveedor.example".to_string()]);
        assert!(doc.secure);
    }

    #[test]
    fn test_plain_text_strips_noise() {
        let doc = extractor().parse(EMPRESA_HTML.as_bytes(), "https://empresa.example/");

        assert!(doc.text.contains("Bienvenidos a Empresa."));
        assert!(!doc.text.contains("Menu principal"));
        assert!(!doc.text.contains("should not appear"));
        assert!(!doc.text.contains("Contacto: info@"));
        assert!(!doc.text.contains("  "));
    }

    #[test]
    fn test_internal_links_normalized() {
        let doc = extractor().parse(EMPRESA_HTML.as_bytes(), "https://empresa.example/");

        assert!(doc.internal_links.contains(&"https://empresa.example/servicios".to_string()));
        assert!(doc.internal_links.contains(&"https://empresa.example/contacto".to_string()));
        for link in &doc.internal_links {
            assert_eq!(domain_key(link).as_deref(), Some("empresa.example"));
        }
    }

    #[test]
    fn test_duplicate_contacts_reported_once() {
        let html = r#"<body>
            <a href="mailto:ventas@empresa.example?subject=Hola">1</a>
            <a href="MAILTO:ventas@empresa.example">2</a>
            <p>ventas@empresa.example</p>
            <a href="tel:+34 922 123 456">3</a>
            <a href="tel:+34922123456">4</a>
            <p>Tel. +34 922 123 456</p>
        </body>"#;
        let doc = extractor().parse(html.as_bytes(), "https://empresa.example");

        assert_eq!(doc.emails.iter().filter(|e| *e == "ventas@empresa.example").count(), 1);
        assert_eq!(doc.phones, vec!["+34922123456".to_string()]);
    }

    #[test]
    fn test_link_caps() {
        let mut html = String::from("<body>");
        for i in 0..120 {
            html.push_str(&format!("<a href=\"/page-{}\">p</a>", i));
            html.push_str(&format!("<a href=\"https://site{}.example/x\">s</a>", i));
        }
        html.push_str("</body>");

        let doc = extractor().parse(html.as_bytes(), "https://empresa.example");
        assert_eq!(doc.internal_links.len(), 50);
        assert_eq!(doc.external_links.len(), 20);
    }

    #[test]
    fn test_www_counts_as_same_domain() {
        let html = r#"<a href="https://www.empresa.example/equipo">a</a><a href="https://blog.otra.example/">b</a>"#;
        let doc = extractor().parse(html.as_bytes(), "https://empresa.example");

        assert_eq!(doc.internal_links, vec!["https://www.empresa.example/equipo".to_string()]);
        assert_eq!(doc.external_links, vec!["https://blog.otra.example".to_string()]);
    }

    #[test]
    fn test_social_first_occurrence_wins() {
        let html = r#"
            <a href="https://x.com/empresa">x</a>
            <a href="https://twitter.com/empresa_old">t</a>
            <a href="https://www.linkedin.com/company/empresa">l</a>
            <a href="https://box.com/file">not social</a>
        "#;
        let doc = extractor().parse(html.as_bytes(), "https://empresa.example");

        assert_eq!(doc.social.get("twitter").map(String::as_str), Some("https://x.com/empresa"));
        assert!(doc.social.contains_key("linkedin"));
        assert_eq!(doc.social.len(), 2);
    }

    #[test]
    fn test_every_tel_link_is_kept() {
        let html = r#"<body>
            <a href="tel:012">emergencias</a>
            <a href="tel:1234">centralita</a>
            <a href="tel:%2B34600000000">móvil</a>
            <a href="tel:+34%20(922)%2011-22-33">fijo</a>
            <p>Ext. 12</p>
        </body>"#;
        let doc = extractor().parse(html.as_bytes(), "https://empresa.example");

        assert_eq!(doc.phones.len(), 4);
        for expected in ["012", "1234", "+34600000000", "+34922112233"] {
            assert_eq!(doc.phones.iter().filter(|p| *p == expected).count(), 1, "{}", expected);
        }
    }

    #[test]
    fn test_mailto_targets_are_percent_decoded() {
        let doc = extractor().parse(
            br#"<a href="mailto:info%40empresa.example?subject=Hola%20mundo">1</a>"#,
            "https://empresa.example",
        );
        assert_eq!(doc.emails, vec!["info@empresa.example".to_string()]);
    }

    #[test]
    fn test_malformed_input_yields_defaults() {
        let doc = extractor().parse(b"\xff\xfe<<<not html", "not a url");

        assert_eq!(doc.meta, PageMeta::default());
        assert!(doc.emails.is_empty());
        assert!(doc.internal_links.is_empty());
        assert!(doc.external_links.is_empty());
        assert!(!doc.secure);
    }

    #[test]
    fn test_text_budget() {
        let settings = ExtractorSettings { max_text_chars: 10, ..ExtractorSettings::default() };
        let extractor = Extractor::new(settings).unwrap();
        let doc = extractor.parse("<p>ñandú ñandú ñandú ñandú</p>".as_bytes(), "https://empresa.example");

        assert_eq!(doc.text.chars().count(), 10);
    }

    #[test]
    fn test_asset_names_are_not_emails() {
        let doc = extractor().parse(b"<img alt=\"logo@2x.png\"><p>logo@2x.png hola@empresa.example</p>", "https://empresa.example");
        assert_eq!(doc.emails, vec!["hola@empresa.example".to_string()]);
    }
}
