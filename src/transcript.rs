use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;
use tracing::warn;

const FENCE: &str = "=====";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Request,
    Response,
    Failure,
}

impl Entry {
    fn label(self) -> &'static str {
        match self {
            Entry::Request => "REQUEST",
            Entry::Response => "RESPONSE",
            Entry::Failure => "FAILURE",
        }
    }
}

/// Append-only record of every upstream exchange of a run.
///
/// Each call writes one fenced block while holding the lock, so blocks from
/// concurrent tasks never interleave.
pub struct Transcript {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Transcript {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open transcript: {}", path))?;
        Ok(Self::to_writer(file))
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }

    pub fn disabled() -> Self {
        Self::to_writer(io::sink())
    }

    pub fn record(&self, entry: Entry, query: &str, offset: usize, attempt: u32, payload: &str) {
        let block = format!(
            "{fence} {time} | {kind} | query=\"{query}\" offset={offset} attempt={attempt}\n{payload}\n{fence}\n",
            fence = FENCE,
            time = Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            kind = entry.label(),
            query = query,
            offset = offset,
            attempt = attempt,
            payload = payload.trim_end(),
        );

        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        let written = out.write_all(block.as_bytes());
        if let Err(err) = written.and_then(|()| out.flush()) {
            warn!("Failed to write transcript entry: {}", err);
        }
    }
}
