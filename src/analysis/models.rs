use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse organization size as judged by the classifier
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrganizationSize {
    Large,
    Medium,
    Small,
    Micro,
    #[default]
    Unknown,
    /// Anything the model said that maps to no known bucket
    Other(String),
}

impl From<String> for OrganizationSize {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "large" | "big" | "grande" => OrganizationSize::Large,
            "medium" | "mid" | "mediana" | "mediano" => OrganizationSize::Medium,
            "small" | "pequeña" | "pequeña empresa" | "pequeño" | "pequena" => OrganizationSize::Small,
            "micro" | "microempresa" => OrganizationSize::Micro,
            "" | "unknown" | "desconocido" => OrganizationSize::Unknown,
            _ => OrganizationSize::Other(raw),
        }
    }
}

impl From<OrganizationSize> for String {
    fn from(size: OrganizationSize) -> Self {
        size.to_string()
    }
}

impl OrganizationSize {
    /// Bucket name used to look up scoring multipliers
    pub fn bucket(&self) -> &str {
        match self {
            OrganizationSize::Large => "large",
            OrganizationSize::Medium => "medium",
            OrganizationSize::Small => "small",
            OrganizationSize::Micro => "micro",
            OrganizationSize::Unknown => "unknown",
            OrganizationSize::Other(raw) => raw,
        }
    }
}

impl fmt::Display for OrganizationSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bucket())
    }
}

/// Quality flags the classifier reports about the site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityIndicators {
    pub professional_site: bool,
    pub has_contact_page: bool,
    pub has_press_room: bool,
    pub active_communication: bool,
}

/// Structured judgement returned by the completion service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationResult {
    pub organization_name: Option<String>,
    pub main_activity: Option<String>,
    pub sector: String,
    pub estimated_size: OrganizationSize,
    /// Geographic scope or location as stated on the site
    pub location: String,
    pub services: Vec<String>,
    pub pain_points: Vec<String>,
    pub opportunities: Vec<String>,
    pub technologies: Vec<String>,
    pub quality: QualityIndicators,
}

/// Classifier output: present, or absent because every model failed
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Classification {
    Present(ClassificationResult),
    #[default]
    Absent,
}

impl Classification {
    pub fn as_result(&self) -> Option<&ClassificationResult> {
        match self {
            Classification::Present(result) => Some(result),
            Classification::Absent => None,
        }
    }

    pub fn into_result(self) -> Option<ClassificationResult> {
        match self {
            Classification::Present(result) => Some(result),
            Classification::Absent => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Classification::Present(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_parsing() {
        assert_eq!(OrganizationSize::from("Grande".to_string()), OrganizationSize::Large);
        assert_eq!(OrganizationSize::from("medium".to_string()), OrganizationSize::Medium);
        assert_eq!(OrganizationSize::from("".to_string()), OrganizationSize::Unknown);
        assert_eq!(
            OrganizationSize::from("multinational".to_string()),
            OrganizationSize::Other("multinational".to_string())
        );
    }

    #[test]
    fn test_partial_payload_deserializes() {
        let json = r#"{"sector": "turismo", "estimated_size": "pequeña", "pain_points": ["sin clipping"]}"#;
        let result: ClassificationResult = serde_json::from_str(json).unwrap();

        assert_eq!(result.sector, "turismo");
        assert_eq!(result.estimated_size, OrganizationSize::Small);
        assert_eq!(result.pain_points.len(), 1);
        assert!(result.technologies.is_empty());
        assert!(!result.quality.has_press_room);
    }
}
