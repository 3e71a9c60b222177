//! # tether-llm
//!
//! Abstraction over the external reasoning engine. The turn loop speaks
//! only to the [`LlmProvider`] trait; the Anthropic adapter is the one
//! coupling point to a real wire format, and the mock provider gives
//! deterministic responses for tests.

pub mod anthropic;
pub mod mock;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockResponse};
pub use provider::{LlmProvider, LlmRequest, LlmResponse, StopReason, Usage};
