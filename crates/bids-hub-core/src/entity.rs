//! Filename entity tokens, file patterns and path templates
//!
//! Names look like `sub-M2001_ses-1_acq-spc3p2_T2w.nii.gz`: underscore
//! separated `key-value` tokens, a suffix, then one or more extensions.

use crate::error::{PipelineError, Result};
use crate::table::EntityKey;
use regex::Regex;
use std::path::Path;

/// Extract the value of a `key-value` token from a file name or path.
///
/// Key matching is case-insensitive; the value is returned as written.
/// Only the final path component is scanned.
///
/// ```
/// use bids_hub_core::entity::extract_entity;
///
/// let name = "sub-M2001_ses-1_task-naming40_bold.nii.gz";
/// assert_eq!(extract_entity(name, "TASK").as_deref(), Some("naming40"));
/// assert_eq!(extract_entity(name, "run"), None);
/// ```
pub fn extract_entity(name: &str, key: &str) -> Option<String> {
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);

    // extensions never carry entities
    let stem = match file_name.find('.') {
        Some(dot) => &file_name[..dot],
        None => file_name,
    };

    stem.split('_').find_map(|token| {
        let (k, v) = token.split_once('-')?;
        (k.eq_ignore_ascii_case(key) && !v.is_empty()).then(|| v.to_string())
    })
}

/// Split a directory name like `ses-1` into `("ses", "1")` when it carries
/// the expected entity
pub fn split_level_dir(name: &str, entity: &str) -> Option<(String, String)> {
    let (k, v) = name.split_once('-')?;
    (k.eq_ignore_ascii_case(entity) && !v.is_empty()).then(|| (entity.to_string(), v.to_string()))
}

/// Shell-style file name pattern (`*` and `?`), matched against the final
/// path component. Matching is case-sensitive, like the tree itself.
#[derive(Debug, Clone)]
pub struct FilePattern {
    source: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str("[^/]*"),
                '?' => expr.push_str("[^/]"),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| {
            PipelineError::schema(format!("invalid file pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.matches_name(n))
    }
}

/// Substitute `{entity}` placeholders with the record's directory names,
/// e.g. `derivatives/{sub}/{ses}/anat` -> `derivatives/sub-M2001/ses-1/anat`
pub fn render_template(template: &str, key: &EntityKey) -> String {
    let mut rendered = template.to_string();
    for (entity, label) in &key.0 {
        rendered = rendered.replace(&format!("{{{}}}", entity), &format!("{}-{}", entity, label));
    }
    rendered
}
