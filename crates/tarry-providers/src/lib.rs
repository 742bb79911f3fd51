//! Tarry Providers - provider clients built on the Tarry dispatcher
//!
//! Each provider module pairs typed request/response bodies with an
//! [`ErrorPolicy`](tarry_core::ErrorPolicy) that understands the provider's
//! error payloads.

pub mod budget;
pub mod openai;

pub use budget::TokenBudget;
pub use openai::{OpenAi, OpenAiPolicy};
