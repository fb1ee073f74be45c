//! The reasoning loop runtime.
//!
//! A turn follows a **Reason → Act → Observe** cycle:
//!
//! 1. **Load** the session and merge the caller's input
//! 2. **Compress** old history when it grows past the token threshold
//! 3. **Ask** the model for the next step, with a cached system prompt
//! 4. **If the step acts**: dispatch the call to a backend tool, the
//!    client (frontend tools), or tool introspection, then feed the
//!    observation back and loop to step 3
//! 5. **If the step answers or asks**: persist the session and return
//!
//! The loop also stops when the step budget runs out or the turn is
//! cancelled.

pub mod classifier;
pub mod compress;
pub mod directive;
pub mod dispatch;
pub mod frontend;
pub mod loop_runner;
pub mod prompt;
pub mod session;
pub mod stream_event;
pub mod token;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use classifier::StreamClassifier;
pub use compress::Compressor;
pub use directive::{ParsedAction, ParsedReply, parse_reply};
pub use dispatch::{Observation, Route, ToolDispatcher};
pub use frontend::{FrontendBridge, FrontendReply, FrontendResult};
pub use loop_runner::AgentLoop;
pub use prompt::{PromptCache, PromptPair, PromptSettings};
pub use session::SessionStore;
pub use stream_event::{ContentType, TurnEvent, TypedChunk};
pub use turn::{FinishReason, InputMessage, TurnOutcome, TurnRequest};
