pub mod llm;
pub mod story;
