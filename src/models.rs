use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub roster_path: String,
    pub output_path: String,
    pub output_column_name: String,
    pub concurrent_requests: usize,
    pub api_url: String,
    // Empty string disables the transcript
    pub transcript_path: String,
    pub log_level: String,
    pub fetch: FetchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub rate_limit_fallback_secs: u64,
    pub page_pause_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roster_path: "students.csv".to_string(),
            output_path: "students_with_results.csv".to_string(),
            output_column_name: "Результат перевірки".to_string(),
            concurrent_requests: 5,
            api_url: "http://abit-poisk.org.ua/api/statements/".to_string(),
            transcript_path: "api_transcript.log".to_string(),
            log_level: "info".to_string(),
            fetch: FetchSettings::default(),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_secs: 5,
            rate_limit_fallback_secs: 20,
            page_pause_ms: 300,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrent_requests == 0 {
            anyhow::bail!("concurrent_requests must be at least 1");
        }
        if self.fetch.max_attempts == 0 {
            anyhow::bail!("fetch.max_attempts must be at least 1");
        }
        if self.roster_path.trim().is_empty() {
            anyhow::bail!("roster_path is empty");
        }
        if self.output_column_name.trim().is_empty() {
            anyhow::bail!("output_column_name is empty");
        }
        Ok(())
    }
}

impl FetchSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn rate_limit_fallback(&self) -> Duration {
        Duration::from_secs(self.rate_limit_fallback_secs)
    }

    pub fn page_pause(&self) -> Duration {
        Duration::from_millis(self.page_pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A subject score as published: most subjects carry a number, some carry a
/// textual marker instead (e.g. a "passed" note).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreValue {
    Number(i64),
    Text(String),
}

impl ScoreValue {
    /// Numeric only when every character is an ASCII digit.
    pub fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(value) = raw.parse::<i64>() {
                return ScoreValue::Number(value);
            }
        }
        ScoreValue::Text(raw.to_string())
    }
}

/// Subject → score mapping. Equal maps identify the same physical applicant
/// across every statement they filed.
pub type ScoreFingerprint = BTreeMap<String, ScoreValue>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Places {
    pub total: Option<u32>,
    pub budget_max: Option<u32>,
    pub contract: Option<u32>,
}

/// One row of a statements table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub degree_level_short: String,
    pub degree_level_full: String,
    pub applicant_name: String,
    pub status: String,
    pub rank_position: u32,
    pub rank_url: String,
    pub priority: String,
    pub places: Places,
    pub total_score: Option<f64>,
    pub avg_document_score: String,
    pub score_components: ScoreFingerprint,
    pub coefficients: BTreeMap<String, String>,
    pub university_name: String,
    pub university_url: String,
    pub faculty_short: String,
    pub faculty_full: String,
    pub specialty_code: String,
    pub specialty_name: String,
    pub specialization: String,
    pub quota: String,
    pub originals_submitted: bool,
}

/// A roster entry. `index` is the data row position in the roster file and is
/// the only key the sink uses to write the result back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Applicant {
    pub index: usize,
    pub search_name: String,
    pub score: String,
    pub specialty_code: Option<String>,
    pub prior_result: Option<String>,
    pub final_result: Option<String>,
}

impl Applicant {
    pub fn get_numeric_score(&self) -> Option<f64> {
        parse_decimal(&self.score)
    }

    pub fn needs_resolution(&self) -> bool {
        self.prior_result.is_none() && self.final_result.is_none()
    }
}

/// Build the upstream search string: `Surname I. P.` style initials.
pub fn build_search_name(last_name: &str, first_name: &str, patronymic: &str) -> String {
    let initial = |name: &str| name.trim().chars().next().map(|c| format!("{}.", c));

    let mut search_name = last_name.trim().to_string();
    if let Some(first) = initial(first_name) {
        search_name.push(' ');
        search_name.push_str(&first);
    }
    if let Some(middle) = initial(patronymic) {
        search_name.push(' ');
        search_name.push_str(&middle);
    }
    search_name.trim().to_string()
}

/// Parse a decimal that may use a comma separator.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
