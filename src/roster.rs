use crate::models::{Applicant, build_search_name};
use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, WriterBuilder};
use std::fs;
use std::path::Path;
use tracing::warn;

const SURNAME: &str = "Прізвище";
const FIRST_NAME: &str = "Ім'я";
const PATRONYMIC: &str = "По батькові";
const SCORE: &str = "Конк. бал";
const SPECIALTY: &str = "Код спец";

pub trait ApplicantSource {
    fn load(&self) -> Result<Vec<Applicant>>;
}

pub trait ResultSink {
    /// Persist every applicant carrying a `final_result`; returns how many were written.
    fn save(&self, applicants: &[Applicant]) -> Result<usize>;
}

/// A roster kept as a CSV file with a header row. Results are written into
/// `result_column`, located by header name or appended when absent.
pub struct CsvRoster {
    path: String,
    result_column: String,
}

impl CsvRoster {
    pub fn new(path: impl Into<String>, result_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            result_column: result_column.into(),
        }
    }
}

fn normalize_header(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn find_column(headers: &[String], name: &str) -> Option<usize> {
    let name = normalize_header(name);
    headers.iter().position(|header| normalize_header(header) == name)
}

/// Spreadsheet exports turn `122` into `122.0`.
fn clean_specialty_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    let code = code.strip_suffix(".0").unwrap_or(code).trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

impl ApplicantSource for CsvRoster {
    fn load(&self) -> Result<Vec<Applicant>> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("Failed to open roster: {}", self.path))?;

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let missing: Vec<_> = [SURNAME, FIRST_NAME, PATRONYMIC, SCORE]
            .into_iter()
            .filter(|name| find_column(&headers, name).is_none())
            .collect();
        if !missing.is_empty() {
            bail!("Roster {} is missing required columns: {}", self.path, missing.join(", "));
        }

        let column = |name: &str| find_column(&headers, name);
        let (surname, first_name, patronymic, score) = (
            column(SURNAME).unwrap_or_default(),
            column(FIRST_NAME).unwrap_or_default(),
            column(PATRONYMIC).unwrap_or_default(),
            column(SCORE).unwrap_or_default(),
        );
        let specialty = column(SPECIALTY);
        let result = column(&self.result_column);

        let mut applicants = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let row = row.with_context(|| format!("Failed to read roster row {}", index + 2))?;
            let field = |col: usize| row.get(col).unwrap_or("").trim();

            // Blank rows keep their position so results land on the right line
            let last_name = field(surname);
            if last_name.is_empty() {
                continue;
            }

            applicants.push(Applicant {
                index,
                search_name: build_search_name(last_name, field(first_name), field(patronymic)),
                score: field(score).to_string(),
                specialty_code: specialty.and_then(|col| clean_specialty_code(field(col))),
                prior_result: result
                    .map(field)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string),
                final_result: None,
            });
        }

        Ok(applicants)
    }
}

impl ResultSink for CsvRoster {
    fn save(&self, applicants: &[Applicant]) -> Result<usize> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("Failed to open roster: {}", self.path))?;

        let mut rows: Vec<Vec<String>> = Vec::new();
        for row in reader.records() {
            rows.push(row?.iter().map(str::to_string).collect());
        }
        if rows.is_empty() {
            bail!("Roster {} has no header row", self.path);
        }

        let column = match find_column(&rows[0], &self.result_column) {
            Some(column) => column,
            None => {
                rows[0].push(self.result_column.clone());
                rows[0].len() - 1
            }
        };

        let mut written = 0;
        for applicant in applicants {
            let Some(result) = &applicant.final_result else {
                continue;
            };
            let Some(row) = rows.get_mut(applicant.index + 1) else {
                warn!(
                    "Roster row {} for '{}' no longer exists, result not saved",
                    applicant.index + 2,
                    applicant.search_name
                );
                continue;
            };
            if row.len() <= column {
                row.resize(column + 1, String::new());
            }
            row[column] = result.clone();
            written += 1;
        }

        let temp_path = format!("{}.tmp", self.path);
        {
            let mut writer = WriterBuilder::new()
                .flexible(true)
                .from_path(&temp_path)
                .with_context(|| format!("Failed to create {}", temp_path))?;
            for row in &rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        fs::rename(&temp_path, &self.path).with_context(|| {
            format!("Failed to replace {} (is it open in another program?)", self.path)
        })?;

        Ok(written)
    }
}

/// Work on a copy of the roster so the original stays untouched.
pub fn ensure_working_copy(roster_path: &str, output_path: &str) -> Result<bool> {
    if Path::new(output_path).exists() {
        return Ok(false);
    }
    fs::copy(roster_path, output_path)
        .with_context(|| format!("Failed to copy {} to {}", roster_path, output_path))?;
    Ok(true)
}
