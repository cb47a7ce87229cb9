use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::models::{Classification, ClassificationResult};
use crate::cli::config::ScoringSettings;
use crate::extract::ExtractedDocument;

/// Technologies needed for the full technology contribution
const TECHNOLOGY_SATURATION: f64 = 5.0;

/// Pain points needed for the full pain-point share of activity
const PAIN_POINT_SATURATION: f64 = 3.0;

/// Discrete lead priority derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    C,
    D,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
            Tier::D => "D",
        }
    }

    /// Human-readable follow-up guidance for reports
    pub fn description(&self) -> &'static str {
        match self {
            Tier::A => "Top priority - contact immediately",
            Tier::B => "High priority - include in main campaign",
            Tier::C => "Medium priority - secondary pool",
            Tier::D => "Low priority - do not contact",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic lead scorer
pub struct Scorer {
    settings: ScoringSettings,
}

impl Scorer {
    pub fn new(settings: ScoringSettings) -> Self {
        Self { settings }
    }

    /// Score in [0, 10], one decimal. Factors that need a classification
    /// contribute nothing when it is absent.
    pub fn score(&self, document: &ExtractedDocument, classification: &Classification) -> f64 {
        let w = &self.settings.weights;
        let analysis = classification.as_result();

        let factors = [
            (w.contact, self.contact_factor(document)),
            (w.social, social_factor(document)),
            (w.professionalism, professionalism_factor(document, analysis)),
            (w.size, analysis.map_or(0.0, |a| self.size_factor(a))),
            (w.sector, analysis.map_or(0.0, |a| self.sector_factor(a))),
            (w.technology, analysis.map_or(0.0, technology_factor)),
            (w.geography, self.geography_factor(document, analysis)),
            (w.activity, analysis.map_or(0.0, activity_factor)),
        ];

        let max: f64 = factors.iter().map(|(weight, _)| weight.max(0.0)).sum();
        if max <= 0.0 {
            return 0.0;
        }
        let total: f64 = factors
            .iter()
            .map(|(weight, factor)| weight.max(0.0) * factor.clamp(0.0, 1.0))
            .sum();

        let normalized = (total / max * 10.0 * 10.0).round() / 10.0;
        if normalized.is_finite() { normalized.clamp(0.0, 10.0) } else { 0.0 }
    }

    /// Map a score onto its tier using inclusive lower bounds
    pub fn tier(score: f64) -> Tier {
        if score >= 8.0 {
            Tier::A
        } else if score >= 6.0 {
            Tier::B
        } else if score >= 4.0 {
            Tier::C
        } else {
            Tier::D
        }
    }

    fn contact_factor(&self, document: &ExtractedDocument) -> f64 {
        let corporate_email = document.emails.iter().any(|email| {
            let domain = email.rsplit('@').next().unwrap_or_default();
            !self
                .settings
                .free_email_domains
                .iter()
                .any(|free| domain.contains(free.as_str()))
        });

        let mut factor = 0.0;
        if corporate_email {
            factor += 0.6;
        } else if !document.emails.is_empty() {
            factor += 0.3;
        }
        if !document.phones.is_empty() {
            factor += 0.4;
        }
        factor
    }

    fn size_factor(&self, analysis: &ClassificationResult) -> f64 {
        self.settings
            .size_multipliers
            .get(analysis.estimated_size.bucket())
            .copied()
            .unwrap_or(self.settings.default_size_multiplier)
    }

    fn sector_factor(&self, analysis: &ClassificationResult) -> f64 {
        let sector = normalize_label(&analysis.sector);
        let listed = |sectors: &[String]| sectors.iter().any(|s| normalize_label(s) == sector);

        if listed(&self.settings.high_priority_sectors) {
            1.0
        } else if listed(&self.settings.medium_priority_sectors) {
            0.5
        } else {
            self.settings.default_sector_multiplier
        }
    }

    fn geography_factor(&self, document: &ExtractedDocument, analysis: Option<&ClassificationResult>) -> f64 {
        let mut haystack = format!(
            "{} {} {}",
            document.meta.display_title(),
            document.meta.display_description(),
            document.meta.keywords
        );
        if let Some(analysis) = analysis {
            haystack.push(' ');
            haystack.push_str(&analysis.location);
        }
        let haystack = haystack.to_lowercase();
        let mentions = |keywords: &[String]| keywords.iter().any(|k| haystack.contains(&k.to_lowercase()));

        if mentions(&self.settings.priority_region_keywords) {
            1.0
        } else if mentions(&self.settings.secondary_region_keywords) {
            0.6
        } else {
            0.2
        }
    }
}

fn social_factor(document: &ExtractedDocument) -> f64 {
    match document.social.len() {
        0 => 0.0,
        1 => 0.5,
        _ => 1.0,
    }
}

fn professionalism_factor(document: &ExtractedDocument, analysis: Option<&ClassificationResult>) -> f64 {
    let mut factor = 0.0;
    if document.secure {
        factor += 0.5;
    }
    if !document.meta.display_title().is_empty() && !document.meta.display_description().is_empty() {
        factor += 0.25;
    }
    if analysis.map_or(false, |a| a.quality.professional_site) {
        factor += 0.25;
    }
    factor
}

fn technology_factor(analysis: &ClassificationResult) -> f64 {
    (analysis.technologies.len() as f64 / TECHNOLOGY_SATURATION).min(1.0)
}

fn activity_factor(analysis: &ClassificationResult) -> f64 {
    let mut factor = 0.6 * (analysis.pain_points.len() as f64 / PAIN_POINT_SATURATION).min(1.0);
    if analysis.quality.has_press_room {
        factor += 0.2;
    }
    if analysis.quality.active_communication {
        factor += 0.2;
    }
    factor
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase().replace('_', " ")
}
