//! # saga-chat
//!
//! Hook-driven chat pipeline for saga.
//!
//! Lines typed by the player are routed through a [`HookRegistry`]: service
//! commands first, then the `process_input` step, then the `ai_response`
//! stream, which is driven by a background worker and shown on a
//! [`DisplaySurface`] as fragments arrive.

pub mod display;
pub mod error;
pub mod hooks;
pub mod interface;
pub mod stream;

#[cfg(test)]
mod testing;

pub use display::{DisplaySurface, InputSource};
pub use error::{ChatError, Result};
pub use hooks::{
    AI_RESPONSE, CommandHook, EXIT, FragmentStream, Hook, HookRegistry, HookResponse, HookStack,
    InputHook, InputProcessingStatus, MessageStatus, PROCESS_INPUT, RESPONSE_COMPLETE, StreamHook,
};
pub use interface::{ChatConfig, ChatInterface, LineOutcome};
pub use stream::{StreamItem, StreamOutcome, StreamSettings, display_streaming_response};
