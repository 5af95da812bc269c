use crate::extractor::extract_applications;
use crate::models::{Applicant, ApplicationRecord, ScoreFingerprint};
use std::fmt;

const SCORE_REL_TOLERANCE: f64 = 1e-5;

/// What the roster gets told about one applicant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoApplications,
    NoRecordsParsed,
    Unidentified,
    MissingScoreBreakdown,
    AlreadyDecided,
    MustCall,
    ApiError(String),
    Failed(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NoApplications => write!(f, "Не знайдено жодної заяви"),
            Outcome::NoRecordsParsed => write!(f, "Не знайдено. Треба дзвонити"),
            Outcome::Unidentified => write!(f, "Знайдено, але не ідентифіковано"),
            Outcome::MissingScoreBreakdown => write!(f, "Не вдалось отримати бали НМТ"),
            Outcome::AlreadyDecided => write!(f, "Вже визначився"),
            Outcome::MustCall => write!(f, "Потрібно дзвонити"),
            Outcome::ApiError(message) => write!(f, "Помилка API: {}", message),
            Outcome::Failed(message) => write!(f, "Критична помилка: {}", message),
        }
    }
}

pub struct ApplicantAnalyzer<'a> {
    pub applicant: &'a Applicant,
}

impl<'a> ApplicantAnalyzer<'a> {
    pub fn new(applicant: &'a Applicant) -> Self {
        Self { applicant }
    }

    /// Decide from the raw HTML returned by the fetcher.
    pub fn analyze_html(&self, html: &str) -> Outcome {
        if html.trim().is_empty() {
            return Outcome::NoApplications;
        }
        self.analyze_records(&extract_applications(html))
    }

    pub fn analyze_records(&self, records: &[ApplicationRecord]) -> Outcome {
        if records.is_empty() {
            return Outcome::NoRecordsParsed;
        }

        let Some(reference) = self.find_reference(records) else {
            return Outcome::Unidentified;
        };

        let fingerprint = &reference.score_components;
        if fingerprint.is_empty() {
            return Outcome::MissingScoreBreakdown;
        }

        let has_originals = same_applicant(records, fingerprint)
            .iter()
            .any(|record| record.originals_submitted);

        if has_originals {
            Outcome::AlreadyDecided
        } else {
            Outcome::MustCall
        }
    }

    /// First record matching the declared score and specialty, in page order.
    pub fn find_reference<'r>(
        &self,
        records: &'r [ApplicationRecord],
    ) -> Option<&'r ApplicationRecord> {
        let declared_score = self.applicant.get_numeric_score()?;
        let declared_specialty = self
            .applicant
            .specialty_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty());

        records.iter().find(|record| {
            let score_matches = record
                .total_score
                .is_some_and(|score| scores_match(score, declared_score));
            let specialty_matches =
                declared_specialty.map_or(true, |code| record.specialty_code == code);
            score_matches && specialty_matches
        })
    }
}

/// Relative closeness, symmetric in its arguments.
pub fn scores_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= SCORE_REL_TOLERANCE * a.abs().max(b.abs())
}

/// Every record carrying exactly this score breakdown.
pub fn same_applicant<'r>(
    records: &'r [ApplicationRecord],
    fingerprint: &ScoreFingerprint,
) -> Vec<&'r ApplicationRecord> {
    records
        .iter()
        .filter(|record| &record.score_components == fingerprint)
        .collect()
}
