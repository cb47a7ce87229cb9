use url::Url;

/// Dedup and upsert key for a host: lower-cased, leading `www.` removed
pub fn domain_of_host(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    }
}

/// Domain key of an absolute URL, if it has a host
pub fn domain_key(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str().map(domain_of_host)
}

/// Whether `host` is `domain` or one of its subdomains
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.to_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// scheme://host/path with query, fragment and trailing slash removed
pub fn normalize_page_url(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    let port = match url.port() {
        Some(port) => format!(":{}", port),
        None => String::new(),
    };
    let normalized = format!("{}://{}{}{}", url.scheme(), host, port, url.path());
    Some(normalized.trim_end_matches('/').to_string())
}

/// scheme://host of a URL
pub fn site_root(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    Some(format!("{}://{}", url.scheme(), host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_key() {
        assert_eq!(domain_key("https://WWW.Empresa.example/contacto"), Some("empresa.example".to_string()));
        assert_eq!(domain_key("http://blog.empresa.example"), Some("blog.empresa.example".to_string()));
        assert_eq!(domain_key("not a url"), None);
        assert_eq!(domain_key("mailto:info@empresa.example"), None);
    }

    #[test]
    fn test_host_matches() {
        assert!(host_matches("facebook.com", "facebook.com"));
        assert!(host_matches("m.facebook.com", "facebook.com"));
        assert!(!host_matches("notfacebook.com", "facebook.com"));
        assert!(!host_matches("box.com", "x.com"));
    }

    #[test]
    fn test_normalize_page_url() {
        let url = Url::parse("https://Empresa.example/servicios/?utm=1#top").unwrap();
        assert_eq!(normalize_page_url(&url), Some("https://empresa.example/servicios".to_string()));

        let root = Url::parse("https://empresa.example/").unwrap();
        assert_eq!(normalize_page_url(&root), Some("https://empresa.example".to_string()));
    }

    #[test]
    fn test_site_root() {
        let url = Url::parse("http://Proveedor.example/a/b?c=d").unwrap();
        assert_eq!(site_root(&url), Some("http://proveedor.example".to_string()));
    }
}
