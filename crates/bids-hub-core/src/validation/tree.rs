//! Checks against a raw source tree

use super::probe::HeaderProbe;
use super::{check_count, CheckStatus, ValidateOptions, ValidationCheck, ValidationResult};
use crate::discovery::list_level_dirs;
use crate::entity::FilePattern;
use crate::schema::{RecordLevel, RecordSpec, ValidationSpec};
use bids_hub_common::checksum::compute_file_checksum;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const REPORT_LIMIT: usize = 5;

/// Run every declared tree check, in a fixed order
pub fn validate_tree(
    root: &Path,
    spec: &ValidationSpec,
    records: &RecordSpec,
    options: &ValidateOptions,
    probe: &dyn HeaderProbe,
) -> ValidationResult {
    let levels = records.levels.as_slice();
    let tolerance = options.tolerance_for(spec);
    let mut result = ValidationResult::new(root.display().to_string());

    if !root.is_dir() {
        result.add(ValidationCheck::pass_if("dataset_root", "directory exists", "missing", false));
        return result;
    }

    info!("Validating tree {} (tolerance: {})", root.display(), tolerance);

    result.add(check_zero_byte_files(root, &spec.payload_suffixes));
    result.add(check_required_files(root, &spec.required_files));

    let records_root = records.root_dir(root);
    if let (Some(expected), Some(top)) = (spec.expected.subjects, levels.first()) {
        let observed = list_level_dirs(&records_root, &top.entity).map(|d| d.len()).unwrap_or(0);
        result.add(check_count("subjects", observed as u64, expected, tolerance));
    }
    if let Some(expected) = spec.expected.sessions {
        if levels.len() > 1 {
            let observed = record_dirs(&records_root, levels).len();
            result.add(check_count("sessions", observed as u64, expected, tolerance));
        } else {
            result.add(ValidationCheck::skip(
                "sessions",
                expected.to_string(),
                "schema declares no session level",
            ));
        }
    }

    if !spec.modalities.is_empty() {
        let dirs = record_dirs(&records_root, levels);
        for (modality, expectation) in &spec.modalities {
            let check = match FilePattern::new(&expectation.pattern) {
                Ok(pattern) => {
                    let observed = dirs.iter().filter(|d| any_match(d, &pattern)).count();
                    check_count(format!("{}_count", modality), observed as u64, expectation.expected, tolerance)
                },
                Err(e) => invalid_pattern(format!("{}_count", modality), e),
            };
            result.add(check);
        }
    }

    for dataset_pattern in &spec.dataset_patterns {
        let dir = root.join(&dataset_pattern.dir);
        let check = if !dir.is_dir() {
            ValidationCheck::pass_if(
                &dataset_pattern.name,
                dataset_pattern.expected.to_string(),
                "0",
                dataset_pattern.expected == 0,
            )
            .with_message(format!("{}/ not found", dataset_pattern.dir))
        } else {
            match FilePattern::new(&dataset_pattern.pattern) {
                Ok(pattern) => {
                    let observed = walk_files(&dir)
                        .filter(|p| pattern.matches_path(p))
                        .filter(|p| !dataset_pattern.non_empty_only || file_len(p) > 0)
                        .count();
                    check_count(&dataset_pattern.name, observed as u64, dataset_pattern.expected, tolerance)
                },
                Err(e) => invalid_pattern(dataset_pattern.name.clone(), e),
            }
        };
        result.add(check);
    }

    for optional in &spec.optional {
        let dir = root.join(&optional.dir);
        let expected = format!("{}/ present with '{}' files", optional.dir, optional.pattern);
        let check = if !dir.is_dir() {
            ValidationCheck::skip(&optional.name, expected, format!("{}/ not found", optional.dir))
        } else {
            match FilePattern::new(&optional.pattern) {
                Ok(pattern) => {
                    let observed = walk_files(&dir).filter(|p| pattern.matches_path(p)).count();
                    if observed == 0 {
                        ValidationCheck::skip(&optional.name, expected, "directory present but empty")
                    } else {
                        ValidationCheck::new(&optional.name, expected, observed.to_string(), CheckStatus::Pass)
                    }
                },
                Err(e) => invalid_pattern(optional.name.clone(), e),
            }
        };
        result.add(check);
    }

    for archive in &spec.archives {
        result.add(check_archive(root, &archive.path, &archive.sha256));
    }

    let sample_size = options.sample_size.unwrap_or(spec.sample_size);
    if sample_size > 0 {
        let seed = options.seed.unwrap_or(spec.sample_seed);
        result.add(check_payload_integrity(root, spec, sample_size, seed, probe));
    }

    if result.all_passed() {
        info!("Tree validation passed ({} skipped)", result.skipped_count());
    } else {
        warn!("{} of {} tree checks failed", result.failed_count(), result.checks.len());
    }
    result
}

/// Number of innermost record directories in the tree
pub fn count_records_in_tree(root: &Path, records: &RecordSpec) -> usize {
    record_dirs(&records.root_dir(root), &records.levels).len()
}

fn record_dirs(root: &Path, levels: &[RecordLevel]) -> Vec<PathBuf> {
    let mut current = vec![root.to_path_buf()];
    for level in levels {
        current = current
            .iter()
            .flat_map(|dir| list_level_dirs(dir, &level.entity).unwrap_or_default())
            .map(|(path, _)| path)
            .collect();
    }
    current
}

fn walk_files(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                debug!("Skipping unreadable entry: {}", err);
                None
            },
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

fn any_match(dir: &Path, pattern: &FilePattern) -> bool {
    walk_files(dir).any(|p| pattern.matches_path(&p))
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn is_payload(path: &Path, suffixes: &[String]) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| suffixes.iter().any(|s| n.ends_with(s.as_str())))
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

fn invalid_pattern(name: String, err: crate::error::PipelineError) -> ValidationCheck {
    ValidationCheck::pass_if(name, "valid pattern", "invalid", false).with_message(err.to_string())
}

fn check_zero_byte_files(root: &Path, suffixes: &[String]) -> ValidationCheck {
    let empty: Vec<String> = walk_files(root)
        .filter(|p| is_payload(p, suffixes) && file_len(p) == 0)
        .map(|p| relative(root, &p))
        .collect();

    let check = ValidationCheck::pass_if("zero_byte_files", "0", empty.len().to_string(), empty.is_empty());
    if empty.is_empty() {
        check
    } else {
        check.with_message(format!(
            "first {}: {}",
            empty.len().min(REPORT_LIMIT),
            empty.iter().take(REPORT_LIMIT).cloned().collect::<Vec<_>>().join(", ")
        ))
    }
}

fn check_required_files(root: &Path, required: &[String]) -> ValidationCheck {
    let missing: Vec<&str> = required
        .iter()
        .filter(|f| !root.join(f.as_str()).exists())
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        ValidationCheck::pass_if("required_files", "all present", "all present", true)
    } else {
        ValidationCheck::pass_if(
            "required_files",
            "all present",
            format!("missing: {}", missing.len()),
            false,
        )
        .with_message(missing.join(", "))
    }
}

fn check_archive(root: &Path, rel: &str, expected: &str) -> ValidationCheck {
    let path = root.join(rel);
    let name = format!(
        "sha256_{}",
        path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    );

    if !path.is_file() {
        return ValidationCheck::pass_if(name, expected, "missing", false);
    }
    match compute_file_checksum(&path) {
        Ok(actual) => {
            let ok = actual.eq_ignore_ascii_case(expected);
            ValidationCheck::pass_if(name, expected, actual, ok)
        },
        Err(e) => ValidationCheck::pass_if(name, expected, "unreadable", false).with_message(e.to_string()),
    }
}

/// Seeded random sample of payload headers. Every sample is probed; each
/// failure is named in the message.
fn check_payload_integrity(
    root: &Path,
    spec: &ValidationSpec,
    sample_size: usize,
    seed: u64,
    probe: &dyn HeaderProbe,
) -> ValidationCheck {
    let preferred = spec
        .sample_pattern
        .as_deref()
        .and_then(|p| FilePattern::new(p).ok());

    let mut candidates: Vec<PathBuf> = match preferred {
        Some(ref pattern) => walk_files(root).filter(|p| pattern.matches_path(p)).collect(),
        None => Vec::new(),
    };
    if candidates.is_empty() {
        candidates = walk_files(root)
            .filter(|p| is_payload(p, &spec.payload_suffixes))
            .collect();
    }
    if candidates.is_empty() {
        return ValidationCheck::pass_if("payload_integrity", "readable headers", "no payload files found", false);
    }
    candidates.sort();

    let mut rng = StdRng::seed_from_u64(seed);
    let sample: Vec<&PathBuf> = candidates.choose_multiple(&mut rng, sample_size).collect();

    let failures: Vec<String> = sample
        .iter()
        .filter_map(|path| match probe.probe(path) {
            Ok(_) => None,
            Err(e) => Some(format!("{}: {}", relative(root, path), e)),
        })
        .collect();

    let observed = format!("{}/{} readable", sample.len() - failures.len(), sample.len());
    let check = ValidationCheck::pass_if(
        "payload_integrity",
        format!("{}/{} readable", sample.len(), sample.len()),
        observed,
        failures.is_empty(),
    );
    if failures.is_empty() {
        check
    } else {
        check.with_message(format!("failed on {}", failures.join("; ")))
    }
}
