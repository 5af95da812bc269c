use crate::analyzer::{ApplicantAnalyzer, Outcome};
use crate::client::Transport;
use crate::fetcher::StatementFetcher;
use crate::models::Applicant;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{Instrument, debug, info, info_span, warn};

/// Reported once per applicant, in completion order.
pub struct Progress<'a> {
    pub completed: usize,
    pub total: usize,
    pub applicant: &'a Applicant,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub scheduled: usize,
    pub completed: usize,
    pub interrupted: bool,
}

/// Fetch and decide one applicant. Fetch failures become the outcome text.
pub async fn resolve_applicant<T: Transport>(
    fetcher: &StatementFetcher<T>,
    applicant: &Applicant,
) -> Outcome {
    match fetcher.fetch_all(&applicant.search_name).await {
        Ok(html) => ApplicantAnalyzer::new(applicant).analyze_html(&html),
        Err(err) => {
            warn!("'{}': {}", applicant.search_name, err);
            Outcome::ApiError(err.to_string())
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Runs one task per unresolved applicant. Concurrency is bounded by the
/// fetcher's gate, not by the number of tasks.
pub struct Orchestrator<T> {
    fetcher: Arc<StatementFetcher<T>>,
}

impl<T: Transport + 'static> Orchestrator<T> {
    pub fn new(fetcher: StatementFetcher<T>) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
        }
    }

    /// Resolve every applicant that has no result yet.
    ///
    /// Results are merged into `applicants` by this function only, as tasks
    /// finish. When `shutdown` resolves, outstanding tasks are aborted; results
    /// already produced are still merged and the report is marked interrupted.
    pub async fn run<F, P>(
        &self,
        applicants: &mut [Applicant],
        shutdown: F,
        mut on_progress: P,
    ) -> RunReport
    where
        F: Future<Output = ()>,
        P: FnMut(Progress<'_>),
    {
        let pending: Vec<usize> = applicants
            .iter()
            .enumerate()
            .filter(|(_, applicant)| applicant.needs_resolution())
            .map(|(slot, _)| slot)
            .collect();

        let mut report = RunReport {
            scheduled: pending.len(),
            ..RunReport::default()
        };
        if pending.is_empty() {
            return report;
        }

        let mut abort_handles = Vec::with_capacity(pending.len());
        let mut tasks = FuturesUnordered::new();
        for slot in pending {
            let applicant = applicants[slot].clone();
            let fetcher = Arc::clone(&self.fetcher);
            let span = info_span!("applicant", index = applicant.index);

            let handle = tokio::spawn(
                async move { resolve_applicant(&fetcher, &applicant).await }.instrument(span),
            );
            abort_handles.push(handle.abort_handle());
            tasks.push(handle.map(move |joined| (slot, joined)));
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                next = tasks.next() => match next {
                    Some((slot, joined)) => {
                        self.merge(applicants, slot, joined, &mut report, &mut on_progress);
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    info!(
                        "Interrupted, abandoning {} unfinished applicants",
                        report.scheduled - report.completed
                    );
                    report.interrupted = true;
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    // Tasks that finished before the abort still hand back their outcome
                    while let Some((slot, joined)) = tasks.next().await {
                        if matches!(&joined, Err(err) if err.is_cancelled()) {
                            continue;
                        }
                        self.merge(applicants, slot, joined, &mut report, &mut on_progress);
                    }
                    break;
                }
            }
        }

        report
    }

    fn merge<P>(
        &self,
        applicants: &mut [Applicant],
        slot: usize,
        joined: Result<Outcome, JoinError>,
        report: &mut RunReport,
        on_progress: &mut P,
    ) where
        P: FnMut(Progress<'_>),
    {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => Outcome::Failed(panic_message(err.into_panic())),
            Err(err) => Outcome::Failed(err.to_string()),
        };

        let applicant = &mut applicants[slot];
        if applicant.final_result.is_some() {
            return;
        }
        debug!("'{}': {}", applicant.search_name, outcome);
        applicant.final_result = Some(outcome.to_string());
        report.completed += 1;

        on_progress(Progress {
            completed: report.completed,
            total: report.scheduled,
            applicant,
        });
    }
}
