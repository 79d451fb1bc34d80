//! Programming DSL: document shape, parsing, and compilation.

pub mod compiler;
pub mod document;
pub mod parser;

pub use compiler::{compile_schedule, count_total_slots, CompiledSchedule, SequentialCounters};
pub use document::ProgrammingDocument;
pub use parser::parse_dsl;
