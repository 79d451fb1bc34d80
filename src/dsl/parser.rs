//! DSL parsing: YAML text to a `ProgrammingDocument`.

use crate::error::{RetrovueError, Result};

use super::document::ProgrammingDocument;

pub fn parse_dsl(text: &str) -> Result<ProgrammingDocument> {
    serde_yaml::from_str(text).map_err(|e| RetrovueError::Compile(format!("DSL parse error: {e}")))
}
