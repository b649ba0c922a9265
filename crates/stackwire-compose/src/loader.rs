//! YAML stack documents.
//!
//! A document lists the stacks of a batch:
//!
//! ```yaml
//! stacks:
//!   - name: parameterstore-stack
//!     resources:
//!       - id: ProjectName
//!         kind: parameter
//!         properties:
//!           parameterName: /vectorAzul/ProjectName
//!           stringValue: vectorAzul
//!     outputs:
//!       - name: vectorProjectRef
//!         value: { ref: ProjectName.value }
//!         export: projectAzul
//! ```

use std::path::Path;

use serde::Deserialize;
use stackwire_common::error::{Result, StackwireError};

use crate::model::StackUnit;
use crate::validator;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StackDocument {
    stacks: Vec<StackUnit>,
}

/// Parses and validates a stack document.
///
/// # Errors
///
/// Returns [`StackwireError::Config`] if the YAML is malformed or any stack
/// fails validation.
pub fn parse_stacks(input: &str) -> Result<Vec<StackUnit>> {
    let document: StackDocument = serde_yaml::from_str(input).map_err(|e| StackwireError::Config {
        message: format!("malformed stack document: {e}"),
    })?;
    validator::validate_batch(&document.stacks)?;
    tracing::debug!(stacks = document.stacks.len(), "stack document parsed");
    Ok(document.stacks)
}

/// Reads, parses, and validates a stack document from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its content is invalid.
pub fn load_stacks(path: &Path) -> Result<Vec<StackUnit>> {
    tracing::info!(path = %path.display(), "loading stack document");
    let content = std::fs::read_to_string(path).map_err(|e| StackwireError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_stacks(&content)
}
