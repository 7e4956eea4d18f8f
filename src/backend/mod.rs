pub mod claude_cli;
pub mod events;
pub mod stream;
