//! Built-in dataset schemas and schema argument resolution

use crate::error::{CliError, Result};
use bids_hub_core::Schema;
use std::path::Path;

/// Schemas compiled into the binary, by name
pub const BUILTIN: &[(&str, &str)] = &[
    ("arc", include_str!("../../../schemas/arc.toml")),
    ("aomic-piop1", include_str!("../../../schemas/aomic-piop1.toml")),
    ("isles24", include_str!("../../../schemas/isles24.toml")),
];

pub fn builtin(name: &str) -> Option<&'static str> {
    BUILTIN
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, toml)| *toml)
}

/// A path to a TOML file wins over a built-in name
pub fn resolve(arg: &str) -> Result<Schema> {
    let path = Path::new(arg);
    if path.is_file() {
        return Ok(Schema::from_path(path)?);
    }
    match builtin(arg) {
        Some(toml) => Ok(Schema::from_toml_str(toml)?),
        None => Err(CliError::SchemaNotFound(arg.to_string())),
    }
}
