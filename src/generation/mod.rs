//! Text generation: the model contract and the collect-then-emit retry loop.

pub mod generator;
pub mod retry;

pub use generator::{ScriptedGenerator, TextGenerator, TokenStream, tokenize};
pub use retry::{RetryOrchestrator, RetryOutcome};
