//! Ingestion → dedup → response pipeline.
//!
//! Each cycle:
//! 1. `MailboxReader::fetch_candidates()` lists unseen, unprocessed keyword matches
//! 2. `ReplyGenerator::generate()` drafts a reply from the body
//! 3. `dispatch()` sends it back to the sender
//! 4. `ProcessedIds::persist()` records what was handled

pub mod poller;

pub use poller::{CycleReport, PollSettings, PollState, Poller, spawn_poller};
