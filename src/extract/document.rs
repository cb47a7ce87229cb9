use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

/// Meta fields of a page. Absent tags are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub og_title: String,
    pub og_description: String,
}

impl PageMeta {
    /// Title, falling back to the Open Graph title
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() { &self.og_title } else { &self.title }
    }

    /// Description, falling back to the Open Graph description
    pub fn display_description(&self) -> &str {
        if self.description.is_empty() { &self.og_description } else { &self.description }
    }
}

/// Structured result of parsing one fetched page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// URL the document was parsed against
    pub base_url: String,

    /// Whether the page was served over HTTPS
    pub secure: bool,

    pub meta: PageMeta,

    /// Unique email addresses
    pub emails: Vec<String>,

    /// Unique phone numbers, normalized to digits with optional leading '+'
    pub phones: Vec<String>,

    /// Platform name -> profile URL, first occurrence per platform
    pub social: BTreeMap<String, String>,

    /// Flattened visible text, whitespace collapsed, length bounded
    pub text: String,

    /// Same-domain page URLs, normalized
    pub internal_links: Vec<String>,

    /// Cross-domain site roots (scheme://host), noise domains removed
    pub external_links: Vec<String>,
}

impl ExtractedDocument {
    pub fn has_contact(&self) -> bool {
        !self.emails.is_empty() || !self.phones.is_empty()
    }
}
