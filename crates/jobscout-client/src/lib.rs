pub mod browser;
pub mod llm;

pub use browser::{ChromiumLauncher, ChromiumPage};
pub use llm::OpenAiMatchScorer;
