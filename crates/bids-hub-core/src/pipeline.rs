//! The core operations: discover, validate, stage, publish, resume, teardown

use crate::assembler::{assemble, AssemblyReport};
use crate::discovery::{DiscoveryEngine, DiscoveryReport};
use crate::error::{PipelineError, Result};
use crate::metadata::MetadataTable;
use crate::publish::{DatasetManifest, Destination, PublishSession, Publisher, SessionState};
use crate::schema::Schema;
use crate::staging::{ShardPlan, Stager, StagingOptions};
use crate::table::Table;
use crate::validation::{
    validate_table, validate_tree, NiftiHeaderProbe, ValidateOptions, ValidationResult,
    ValidationTarget,
};
use std::path::Path;
use tracing::info;

/// A discovered and assembled dataset
#[derive(Debug, Clone)]
pub struct Discovered {
    pub table: Table,
    pub discovery: DiscoveryReport,
    pub assembly: AssemblyReport,
}

/// Walk `root` as the schema describes and assemble the Table.
///
/// Fails fast on structural problems, missing required companions and
/// classification errors; metadata coercion failures only produce nulls.
pub fn discover(root: &Path, schema: &Schema) -> Result<Discovered> {
    schema.validate()?;

    let metadata = schema
        .metadata
        .as_ref()
        .map(|source| MetadataTable::load(root, source))
        .transpose()?;

    let engine = DiscoveryEngine::new(schema, root, metadata.as_ref())?;
    let discovery = engine.run()?;
    let assembled = assemble(schema, &discovery, metadata.as_ref())?;

    info!(
        "Assembled {} rows for {} ({} rejected, {} coercion failures)",
        assembled.table.len(),
        schema.dataset.name,
        assembled.report.rejected.len(),
        assembled.report.coercion_failures
    );

    Ok(Discovered {
        table: assembled.table,
        discovery: discovery.report,
        assembly: assembled.report,
    })
}

/// Run the tree or table checks; never fails, every outcome is a check
pub fn validate(
    target: ValidationTarget<'_>,
    schema: &Schema,
    options: &ValidateOptions,
) -> ValidationResult {
    let result = match target {
        ValidationTarget::Tree(root) => validate_tree(
            root,
            &schema.validation,
            &schema.records,
            options,
            &NiftiHeaderProbe,
        ),
        ValidationTarget::Table { table, tree } => validate_table(table, schema, tree, options),
    };
    info!("{}", result.summary());
    result
}

/// Create a session under `staging_root` and stage `table` into it
pub fn stage(
    table: &Table,
    schema: &Schema,
    staging_root: &Path,
    shard_count: Option<usize>,
    options: StagingOptions,
) -> Result<PublishSession> {
    let plan = ShardPlan::new(table.len(), shard_count)?;

    std::fs::create_dir_all(staging_root)?;
    let mut session = PublishSession::create(staging_root)?;
    session.transition(SessionState::Staging)?;

    let stager = Stager::new(session.dir(), options);
    let info = stager.stage(&schema.dataset.name, &schema.records.levels, table, &plan)?;

    session.record_staged(&info);
    session.manifest = Some(
        DatasetManifest::from_staged(&info)
            .with_description(schema.dataset.description.clone())
            .with_license(schema.dataset.license.clone()),
    );
    session.transition(SessionState::Staged)?;
    Ok(session)
}

/// Stage `table` and publish it. The returned session is either
/// `PUBLISHED` or `PUBLISH_FAILED`; in both cases staging is kept.
pub async fn publish(
    table: &Table,
    schema: &Schema,
    destination: &Destination,
    shard_count: Option<usize>,
    staging_root: &Path,
    options: StagingOptions,
    publisher: &mut Publisher,
) -> Result<PublishSession> {
    let mut session = stage(table, schema, staging_root, shard_count, options)?;
    publisher.publish(&mut session, destination).await?;
    Ok(session)
}

fn resolve_destination(
    session: &PublishSession,
    destination: Option<&Destination>,
) -> Result<Destination> {
    destination
        .cloned()
        .or_else(|| session.destination.clone())
        .ok_or_else(|| {
            PipelineError::session(format!(
                "session {} has no recorded destination; pass one explicitly",
                session.id
            ))
        })
}

/// Continue a staged, failed or interrupted session, uploading only shards
/// not yet confirmed by the remote listing
pub async fn resume(
    session_dir: &Path,
    destination: Option<&Destination>,
    publisher: &mut Publisher,
) -> Result<PublishSession> {
    let mut session = PublishSession::load(session_dir)?;
    let destination = resolve_destination(&session, destination)?;

    match session.state {
        SessionState::Staged | SessionState::Publishing | SessionState::PublishFailed => {
            publisher.publish(&mut session, &destination).await?;
            Ok(session)
        }
        SessionState::Published => {
            info!("Session {} is already published", session.id);
            Ok(session)
        }
        other => Err(PipelineError::session(format!(
            "cannot resume session {} in state {}",
            session.id, other
        ))),
    }
}

/// Remove a published session's staged shards after re-listing the remote
pub async fn teardown(
    session_dir: &Path,
    destination: Option<&Destination>,
    publisher: &Publisher,
) -> Result<PublishSession> {
    let mut session = PublishSession::load(session_dir)?;
    let destination = resolve_destination(&session, destination)?;
    publisher.teardown(&mut session, &destination).await?;
    Ok(session)
}
