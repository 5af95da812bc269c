use crate::error::RowError;
use crate::models::{ApplicationRecord, Places, ScoreFingerprint, ScoreValue, parse_decimal};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

pub const REQUIRED_CELLS: usize = 14;
const BASE_URL: &str = "https://abit-poisk.org.ua";

struct Selectors {
    tbody: Selector,
    row: Selector,
    cell: Selector,
    div: Selector,
    link: Selector,
    subject: Selector,
    points: Selector,
    coefficients: Selector,
    item: Selector,
    span: Selector,
    specialty: Regex,
    number: Regex,
}

impl Selectors {
    fn new() -> Self {
        Self {
            tbody: Selector::parse("tbody").unwrap(),
            row: Selector::parse("tr").unwrap(),
            cell: Selector::parse("td").unwrap(),
            div: Selector::parse("div").unwrap(),
            link: Selector::parse("a").unwrap(),
            subject: Selector::parse("dt").unwrap(),
            points: Selector::parse("dd").unwrap(),
            coefficients: Selector::parse("ul.list-unstyled").unwrap(),
            item: Selector::parse("li").unwrap(),
            span: Selector::parse("span").unwrap(),
            specialty: Regex::new(r"(?s)^([A-Z0-9]+)(.*)").unwrap(),
            number: Regex::new(r"\d+").unwrap(),
        }
    }

    fn get() -> &'static Selectors {
        static SELECTORS: OnceLock<Selectors> = OnceLock::new();
        SELECTORS.get_or_init(Selectors::new)
    }
}

/// Parse every statement row found in the `tbody` sections of `html`.
///
/// A row that cannot be read is dropped on its own; the rest of the page is
/// still returned.
pub fn extract_applications(html: &str) -> Vec<ApplicationRecord> {
    if html.trim().is_empty() {
        return Vec::new();
    }

    let document = Html::parse_document(html);
    let selectors = Selectors::get();

    let mut applications = Vec::new();
    for body in document.select(&selectors.tbody) {
        for row in body.select(&selectors.row) {
            match extract_row(row, selectors) {
                Ok(record) => applications.push(record),
                Err(err) => debug!("Skipping statement row: {}", err),
            }
        }
    }

    applications
}

fn extract_row(row: ElementRef, selectors: &Selectors) -> Result<ApplicationRecord, RowError> {
    let cells: Vec<_> = row.select(&selectors.cell).collect();
    if cells.len() < REQUIRED_CELLS {
        return Err(RowError::TooFewCells(cells.len(), REQUIRED_CELLS));
    }

    let degree_level_short = first_match(cells[0], &selectors.div, 0, "div").map(cell_text)?;
    let rank_link = first_match(cells[3], &selectors.link, 3, "a")?;
    let university_link = first_match(cells[9], &selectors.link, 9, "a")?;

    let (score_components, coefficients) = extract_score_breakdown(cells[8], selectors);
    let (specialty_code, specialty_name, specialization) =
        extract_specialty(cells[11], selectors);

    Ok(ApplicationRecord {
        degree_level_short,
        degree_level_full: attr(cells[0], "title"),
        applicant_name: cell_text(cells[1]),
        status: cell_text(cells[2]),
        // Unreadable rank defaults to 0 rather than dropping the row
        rank_position: cell_text(cells[3]).parse::<u32>().unwrap_or(0),
        rank_url: absolute_url(rank_link),
        priority: cell_text(cells[4]).split_whitespace().collect::<Vec<_>>().join(" "),
        places: extract_places(cells[5], selectors),
        total_score: parse_decimal(&cell_text(cells[6])),
        avg_document_score: cell_text(cells[7]),
        score_components,
        coefficients,
        university_name: cell_text(cells[9]),
        university_url: absolute_url(university_link),
        faculty_short: cell_text(cells[10]),
        faculty_full: attr(cells[10], "title"),
        specialty_code,
        specialty_name,
        specialization,
        quota: cell_text(cells[12]),
        originals_submitted: cell_text(cells[13]) == "+",
    })
}

/// Subjects come as `<dt>`/`<dd>` pairs, coefficients as `label: value` items.
fn extract_score_breakdown(
    cell: ElementRef,
    selectors: &Selectors,
) -> (ScoreFingerprint, BTreeMap<String, String>) {
    let subjects = cell.select(&selectors.subject);
    let points = cell.select(&selectors.points);

    let scores: ScoreFingerprint = subjects
        .zip(points)
        .map(|(subject, point)| (cell_text(subject), ScoreValue::parse(&cell_text(point))))
        .collect();

    let mut coefficients = BTreeMap::new();
    if let Some(list) = cell.select(&selectors.coefficients).next() {
        for item in list.select(&selectors.item) {
            if let Some((key, value)) = cell_text(item).split_once(':') {
                coefficients.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    (scores, coefficients)
}

fn extract_places(cell: ElementRef, selectors: &Selectors) -> Places {
    let mut places = Places::default();

    for span in cell.select(&selectors.span) {
        let text = cell_text(span);
        let tooltip = attr(span, "data-stooltip").to_lowercase();
        let Some(number) = selectors
            .number
            .find(&text)
            .and_then(|m| m.as_str().parse::<u32>().ok())
        else {
            continue;
        };

        let text = text.to_lowercase();
        if text.contains("вм") || tooltip.contains("загальна кількість") {
            places.total = Some(number);
        } else if text.contains("бм") || tooltip.contains("бюджетних") {
            places.budget_max = Some(number);
        } else if text.contains('к') || tooltip.contains("контракт") {
            places.contract = Some(number);
        }
    }

    places
}

fn extract_specialty(cell: ElementRef, selectors: &Selectors) -> (String, String, String) {
    let divs: Vec<_> = cell.select(&selectors.div).collect();
    let specialty_full = divs.first().map(|div| cell_text(*div)).unwrap_or_default();
    let specialization = divs.get(1).map(|div| cell_text(*div)).unwrap_or_default();

    let (code, name) = match selectors.specialty.captures(&specialty_full) {
        Some(caps) => (caps[1].to_string(), caps[2].trim().to_string()),
        None => (String::new(), specialty_full.clone()),
    };

    (code, name, specialization)
}

fn first_match<'a>(
    cell: ElementRef<'a>,
    selector: &Selector,
    index: usize,
    element: &'static str,
) -> Result<ElementRef<'a>, RowError> {
    cell.select(selector)
        .next()
        .ok_or(RowError::MissingElement { cell: index, element })
}

/// Concatenated text with every text node trimmed.
fn cell_text(element: ElementRef) -> String {
    element.text().map(str::trim).collect::<String>()
}

fn attr(element: ElementRef, name: &str) -> String {
    element.value().attr(name).unwrap_or("").trim().to_string()
}

fn absolute_url(link: ElementRef) -> String {
    format!("{}{}", BASE_URL, link.value().attr("href").unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StatementRow, table};

    #[test]
    fn extracts_every_field_of_a_row() {
        let html = table(&[StatementRow::new("Шевченко Т. Г.", "187.5", "122")
            .subject("Українська мова", "180")
            .subject("Математика", "195")
            .subject("Творчий конкурс", "зар.")
            .originals(true)
            .html()]);

        let records = extract_applications(&html);
        assert_eq!(records.len(), 1);
        let record = &records[0];

        assert_eq!(record.degree_level_short, "Б");
        assert_eq!(record.degree_level_full, "Бакалавр");
        assert_eq!(record.applicant_name, "Шевченко Т. Г.");
        assert_eq!(record.status, "Допущено");
        assert_eq!(record.rank_position, 7);
        assert_eq!(record.rank_url, "https://abit-poisk.org.ua/rate/122");
        assert_eq!(record.priority, "1 (з 5)");
        assert_eq!(record.total_score, Some(187.5));
        assert_eq!(record.avg_document_score, "10.5");
        assert_eq!(record.university_name, "КНУ");
        assert_eq!(record.university_url, "https://abit-poisk.org.ua/univ/41");
        assert_eq!(record.faculty_short, "ФІТ");
        assert_eq!(record.faculty_full, "Факультет інформаційних технологій");
        assert_eq!(record.specialty_code, "122");
        assert_eq!(record.specialty_name, "Комп'ютерні науки");
        assert_eq!(record.specialization, "Data Science");
        assert_eq!(record.quota, "");
        assert!(record.originals_submitted);

        assert_eq!(record.score_components.len(), 3);
        assert_eq!(record.score_components["Математика"], ScoreValue::Number(195));
        assert_eq!(
            record.score_components["Творчий конкурс"],
            ScoreValue::Text("зар.".to_string())
        );
        assert_eq!(record.coefficients["РК"], "1.02");
        assert_eq!(record.coefficients.get("без двокрапки"), None);
    }

    #[test]
    fn reads_places_from_text_and_tooltips() {
        let html = table(&[StatementRow::new("Франко І. Я.", "170", "035")
            .places(
                r#"<span>ВМ: 120</span>
                   <span data-stooltip="Максимальна кількість бюджетних місць">45</span>
                   <span>К: 30</span>
                   <span>без числа</span>"#,
            )
            .html()]);

        let record = &extract_applications(&html)[0];
        assert_eq!(
            record.places,
            Places {
                total: Some(120),
                budget_max: Some(45),
                contract: Some(30),
            }
        );
    }

    #[test]
    fn short_row_is_skipped_but_page_survives() {
        let short_row = format!("<tr>{}</tr>", "<td>x</td>".repeat(10));
        let html = table(&[
            StatementRow::new("Леся У.", "150", "014").html(),
            short_row,
            StatementRow::new("Коцюбинський М. М.", "160", "014").html(),
        ]);

        let names: Vec<_> = extract_applications(&html)
            .into_iter()
            .map(|record| record.applicant_name)
            .collect();
        assert_eq!(names, vec!["Леся У.", "Коцюбинський М. М."]);
    }

    #[test]
    fn structurally_broken_row_is_skipped() {
        let broken = StatementRow::new("Без посилання", "150", "014")
            .html()
            .replace(r#"<a href="/rate/014">7</a>"#, "7");
        let html = table(&[broken, StatementRow::new("Ціла", "151", "014").html()]);

        let records = extract_applications(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].applicant_name, "Ціла");
    }

    #[test]
    fn non_numeric_scores_do_not_drop_the_row() {
        let html = table(&[StatementRow::new("Стус В. С.", "—", "035")
            .rank("—")
            .html()]);

        let records = extract_applications(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_score, None);
        assert_eq!(records[0].rank_position, 0);
    }

    #[test]
    fn collects_rows_across_tables() {
        let html = format!(
            "{}{}",
            table(&[StatementRow::new("Перший", "150", "014").html()]),
            table(&[StatementRow::new("Другий", "151", "015").html()]),
        );

        assert_eq!(extract_applications(&html).len(), 2);
    }

    #[test]
    fn specialty_without_code_keeps_full_name() {
        let html = table(&[StatementRow::new("Без коду", "150", "")
            .specialty_text("Філологія")
            .html()]);

        let record = &extract_applications(&html)[0];
        assert_eq!(record.specialty_code, "");
        assert_eq!(record.specialty_name, "Філологія");
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(extract_applications("").is_empty());
        assert!(extract_applications("<p>Нічого не знайдено</p>").is_empty());
    }
}
