pub mod jsonl;
pub mod line;

pub use jsonl::JsonlReader;
pub use line::LineReader;
