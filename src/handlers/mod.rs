pub mod config;
pub mod llm;
pub mod upload;

pub use config::*;
pub use llm::*;
pub use upload::*;
