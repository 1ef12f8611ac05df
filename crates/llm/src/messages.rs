//! Message types for the supported LLM dialects.
//!
//! The unified representation doubles as the OpenAI chat-completions wire
//! shape; Anthropic gets its own types with explicit conversions.

pub(crate) mod anthropic;
pub(crate) mod unified;
