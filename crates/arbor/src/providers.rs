//! Backend adapters.
//!
//! Each adapter speaks one provider's wire protocol and converts it to the
//! shared [`crate::models::part::Part`] stream. Adapters own their own
//! history so the rest of the crate never has to know how a given backend
//! wants prior turns replayed.

pub mod anthropic;
pub mod base;
pub mod configs;
pub mod factory;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod sse;
pub mod util;
