//! Builders for statement tables and upstream envelopes used across tests.

use crate::client::{Exchange, Transport};
use crate::error::FetchError;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct StatementRow {
    name: String,
    score: String,
    specialty_code: String,
    specialty_text: Option<String>,
    rank: String,
    places: String,
    subjects: Vec<(String, String)>,
    originals: bool,
}

impl StatementRow {
    pub fn new(name: &str, score: &str, specialty_code: &str) -> Self {
        Self {
            name: name.to_string(),
            score: score.to_string(),
            specialty_code: specialty_code.to_string(),
            specialty_text: None,
            rank: "7".to_string(),
            places: "<span>ВМ: 100</span>".to_string(),
            subjects: Vec::new(),
            originals: false,
        }
    }

    pub fn subject(mut self, name: &str, points: &str) -> Self {
        self.subjects.push((name.to_string(), points.to_string()));
        self
    }

    pub fn originals(mut self, submitted: bool) -> Self {
        self.originals = submitted;
        self
    }

    pub fn rank(mut self, rank: &str) -> Self {
        self.rank = rank.to_string();
        self
    }

    pub fn places(mut self, spans: &str) -> Self {
        self.places = spans.to_string();
        self
    }

    pub fn specialty_text(mut self, text: &str) -> Self {
        self.specialty_text = Some(text.to_string());
        self
    }

    pub fn html(&self) -> String {
        let subjects: String = self
            .subjects
            .iter()
            .map(|(name, points)| format!("<dt>{}</dt><dd>{}</dd>", name, points))
            .collect();
        let specialty = self
            .specialty_text
            .clone()
            .unwrap_or_else(|| format!("{} Комп'ютерні науки", self.specialty_code));

        format!(
            concat!(
                "<tr>",
                r#"<td title="Бакалавр"><div>Б</div></td>"#,
                "<td>{name}</td>",
                "<td>Допущено</td>",
                r#"<td><a href="/rate/{code}">{rank}</a></td>"#,
                "<td>  1   (з 5)  </td>",
                "<td>{places}</td>",
                "<td>{score}</td>",
                "<td>10.5</td>",
                "<td><dl>{subjects}</dl>",
                r#"<ul class="list-unstyled"><li>РК: 1.02</li><li>без двокрапки</li></ul></td>"#,
                r#"<td><a href="/univ/41">КНУ</a></td>"#,
                r#"<td title="Факультет інформаційних технологій">ФІТ</td>"#,
                "<td><div>{specialty}</div><div>Data Science</div></td>",
                "<td></td>",
                "<td>{originals}</td>",
                "</tr>"
            ),
            name = self.name,
            code = self.specialty_code,
            rank = self.rank,
            places = self.places,
            score = self.score,
            subjects = subjects,
            specialty = specialty,
            originals = if self.originals { "+" } else { "" },
        )
    }
}

pub fn table(rows: &[String]) -> String {
    format!("<table><tbody>{}</tbody></table>", rows.concat())
}

/// A successful upstream envelope carrying `html` and the total row count.
pub fn envelope(html: &str, count: usize) -> String {
    serde_json::json!({ "success": true, "html": html, "count": count }).to_string()
}

pub fn error_envelope(message: &str) -> String {
    serde_json::json!({ "success": false, "message": message }).to_string()
}

/// In-memory writer whose contents stay readable after it is handed off.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Replays a fixed list of exchanges in call order and records every request.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Exchange, FetchError>>>,
    requests: Mutex<Vec<(String, usize)>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<Exchange, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn offsets(&self) -> Vec<usize> {
        self.requests.lock().unwrap().iter().map(|(_, offset)| *offset).collect()
    }
}

impl Transport for ScriptedTransport {
    async fn post_page(&self, query: &str, offset: usize) -> Result<Exchange, FetchError> {
        self.requests.lock().unwrap().push((query.to_string(), offset));
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(FetchError::Network("script exhausted".to_string())))
    }
}

/// Answers each query with a fixed body (or one per offset) after a per-query
/// delay, and tracks how many exchanges were in flight at once.
#[derive(Default)]
pub struct RosterTransport {
    bodies: HashMap<String, String>,
    pages: HashMap<(String, usize), String>,
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl RosterTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, query: &str, body: String) -> Self {
        self.bodies.insert(query.to_string(), body);
        self
    }

    pub fn answer_at(mut self, query: &str, offset: usize, body: String) -> Self {
        self.pages.insert((query.to_string(), offset), body);
        self
    }

    pub fn delay(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for RosterTransport {
    async fn post_page(&self, query: &str, offset: usize) -> Result<Exchange, FetchError> {
        self.requests.lock().unwrap().push(query.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(query).copied().unwrap_or(Duration::from_millis(10));
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if query == "PANIC" {
            panic!("transport blew up");
        }
        let body = self
            .pages
            .get(&(query.to_string(), offset))
            .or_else(|| self.bodies.get(query))
            .cloned()
            .unwrap_or_else(|| envelope("", 0));
        Ok(Exchange::ok(body))
    }
}
