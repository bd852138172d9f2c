//! Poll loop. One cycle per tick: fetch, then (generate, dispatch) per candidate, then persist.
//!
//! The poller owns the processed-id store and is the only writer of it. Blocking
//! mailbox and SMTP work runs on tokio's blocking pool, but each step is awaited
//! before the next one starts, so there is never more than one cycle or one
//! session in flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::email_types::{InboundMessage, OutboundReply};
use crate::channels::mailbox::MailboxReader;
use crate::channels::smtp::{MailTransmitter, dispatch};
use crate::config::DeliveryPolicy;
use crate::error::{Disposition, Error, MailboxError, TransmitError};
use crate::llm::{GenerationResult, PROCESSING_FAILURE_FALLBACK, ReplyGenerator};
use crate::store::ProcessedIds;

/// Where the loop is between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Processing,
}

/// Knobs for the loop that are not owned by a collaborator.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub keyword: String,
    pub interval: Duration,
    pub delivery: DeliveryPolicy,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub replied: usize,
    pub send_failures: usize,
    pub persisted: bool,
}

/// Ties the reader, generator, dispatcher and dedup store together.
pub struct Poller {
    reader: MailboxReader,
    generator: Arc<dyn ReplyGenerator>,
    transmitter: Arc<dyn MailTransmitter>,
    store: ProcessedIds,
    settings: PollSettings,
    state: PollState,
}

impl Poller {
    pub fn new(
        reader: MailboxReader,
        generator: Arc<dyn ReplyGenerator>,
        transmitter: Arc<dyn MailTransmitter>,
        store: ProcessedIds,
        settings: PollSettings,
    ) -> Self {
        Self {
            reader,
            generator,
            transmitter,
            store,
            settings,
            state: PollState::Idle,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn store(&self) -> &ProcessedIds {
        &self.store
    }

    /// Run one full cycle. Never fails; every error is logged and contained.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.state = PollState::Processing;
        let report = self.cycle().await;
        self.state = PollState::Idle;
        report
    }

    async fn cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let candidates = match self.fetch().await {
            Ok(candidates) => candidates,
            Err(e) => {
                log_contained(None, &e);
                Vec::new()
            }
        };
        report.candidates = candidates.len();

        if candidates.is_empty() {
            info!("No messages match the filter");
        }

        if self.settings.delivery == DeliveryPolicy::AtMostOnce && !candidates.is_empty() {
            for msg in &candidates {
                self.store.record(msg.id.clone());
            }
            report.persisted |= self.persist().await;
        }

        for msg in candidates {
            match self.respond(&msg).await {
                Ok(()) => {
                    report.replied += 1;
                    if self.settings.delivery == DeliveryPolicy::AtLeastOnce {
                        self.store.record(msg.id.clone());
                    }
                }
                Err(e) => {
                    log_contained(Some(&msg.id), &e);
                    report.send_failures += 1;
                }
            }
        }

        if self.store.is_dirty() {
            report.persisted |= self.persist().await;
        }

        info!(
            candidates = report.candidates,
            replied = report.replied,
            send_failures = report.send_failures,
            "Cycle finished"
        );
        report
    }

    async fn fetch(&self) -> Result<Vec<InboundMessage>, Error> {
        let reader = self.reader.clone();
        let keyword = self.settings.keyword.clone();
        let processed: HashSet<String> = self.store.snapshot();

        tokio::task::spawn_blocking(move || reader.fetch_candidates(&keyword, &processed))
            .await
            .unwrap_or_else(|e| Err(MailboxError::Protocol(format!("mailbox task panicked: {e}"))))
            .map_err(Error::from)
    }

    /// Generate and send one reply. Generation failures are contained here;
    /// only the send failure is returned.
    async fn respond(&self, msg: &InboundMessage) -> Result<(), Error> {
        info!(id = %msg.id, from = %msg.sender, subject = %msg.subject, "Generating reply");
        debug!(id = %msg.id, body = %msg.body, "Message body");

        let body = match self.generator.generate(&msg.body).await {
            Ok(result) => {
                if result == GenerationResult::Empty {
                    warn!(id = %msg.id, "Completion produced no content");
                }
                result.into_reply()
            }
            Err(e) => {
                log_contained(Some(&msg.id), &Error::from(e));
                PROCESSING_FAILURE_FALLBACK.to_string()
            }
        };
        let reply = OutboundReply::reply_to(msg, body);

        let transmitter = Arc::clone(&self.transmitter);
        tokio::task::spawn_blocking(move || dispatch(transmitter.as_ref(), &reply))
            .await
            .unwrap_or_else(|e| Err(TransmitError::SendFailed(format!("send task panicked: {e}"))))
            .map_err(Error::from)
    }

    /// Write the store; failures leave it dirty for the next cycle.
    async fn persist(&mut self) -> bool {
        match self.store.persist().await {
            Ok(()) => true,
            Err(e) => {
                log_contained(None, &Error::from(e));
                false
            }
        }
    }
}

/// Log an error the loop absorbs, worded by how far it reaches.
fn log_contained(id: Option<&str>, e: &Error) {
    let id = id.unwrap_or("-");
    match e.disposition() {
        Disposition::Fallback => error!(id, error = %e, "Generation failed, sending fallback reply"),
        Disposition::SkipItem => error!(id, error = %e, "Failed to send reply, skipping message"),
        Disposition::SkipCycle => warn!(error = %e, "Cycle step failed, retrying next cycle"),
    }
}

/// Spawn the poll loop.
///
/// Sending `true` on the returned channel stops the loop: a cycle in progress
/// runs to completion (including its persist), the wait between cycles is cut
/// short, and the task then ends. Dropping the sender stops it the same way.
pub fn spawn_poller(mut poller: Poller) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(
            "Poller started, checking every {}s for {:?}",
            poller.settings.interval.as_secs(),
            poller.settings.keyword
        );

        loop {
            if *shutdown.borrow_and_update() {
                info!("Poller shutting down");
                return;
            }

            info!("Checking mailbox");
            poller.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(poller.settings.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown sender dropped, poller exiting");
                        return;
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}
