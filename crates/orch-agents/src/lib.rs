pub mod ansi;
pub mod claude;
pub mod codex;
pub mod control;
pub mod copilot;
pub mod error;
pub mod executor;
pub mod factory;
pub mod framing;
pub mod gemini;
pub mod process;
pub mod rpc;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use copilot::CopilotAdapter;
pub use error::*;
pub use executor::*;
pub use factory::*;
pub use gemini::GeminiAdapter;
pub use types::*;
