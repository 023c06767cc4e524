//! Chat-completion transport for Marginalia.
//!
//! All providers implement the `marginalia_core::Provider` trait.
//! [`OpenAiCompatProvider`] speaks the OpenAI chat-completion protocol;
//! [`sse::StreamDecoder`] turns its event stream back into deltas and a
//! complete turn.

pub mod openai_compat;
pub mod sse;

pub use openai_compat::OpenAiCompatProvider;
pub use sse::StreamDecoder;
