//! Mail responder: answers keyword-matching emails with a language model.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
