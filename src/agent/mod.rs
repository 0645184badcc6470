//! Agent module - the generation cycle and its supporting pieces
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Caller     │────>│ Orchestrator │────>│ModelProvider │
//! │ (CLI / UI)   │     │              │     │  (Claude)    │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!        ▲                    │   │
//!        │                    │   ▼
//! ┌──────────────┐            │  ┌──────────────┐
//! │   Progress   │<───────────┘  │ClientRegistry│──> MCP server
//! │   Emitter    │               └──────────────┘
//! └──────────────┘
//! ```
//!
//! - [`orchestrator`]: the tool loop
//! - [`compaction`]: history trimming and tool result compression
//! - [`progress`]: per-conversation progress events

pub mod compaction;
pub mod orchestrator;
pub mod progress;

pub use compaction::{compress_tool_result, estimate_tokens, trim_history};
pub use orchestrator::{GenerateRequest, GenerationMode, Orchestrator};
pub use progress::{ProgressEmitter, ProgressEvent, ProgressHandle, Subscription};
