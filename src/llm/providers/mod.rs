pub mod anthropic;
pub mod minimax;
pub mod ollama;
pub mod openai;
pub mod stub;

const SYSTEM_PROMPT: &str = "You output only valid JSON matching the required schema.";
