pub mod chain;
pub mod llm;
pub mod prompt;
pub mod providers;
pub mod story;
pub mod workflow;
