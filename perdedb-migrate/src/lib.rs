//! Cursor-paged iteration over existing records, for re-encrypting data
//! after a key rotation or after enabling encryption on a populated table.
//!
//! The storage layer stays behind two caller-supplied async closures: one
//! counting the records of a model, one migrating the record after a given
//! cursor and returning the new cursor. Iteration stops when the cursor
//! stops advancing, so a full pass never holds more than one record's worth
//! of state.

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use perdedb::schema::ModelDescriptors;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::info;

/// A model that needs a migration pass, with the fields to re-encrypt and
/// the cursor field to paginate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationTarget {
    /// Model name.
    pub model: String,
    /// Encrypted field names, in no particular order.
    pub fields: Vec<String>,
    /// The unique field used to walk the table deterministically.
    pub cursor: String,
}

/// Lists the models worth migrating: those with at least one encrypted
/// field and a usable cursor, sorted by model name.
///
/// Models with encrypted fields but no cursor were already warned about
/// during schema analysis and are skipped here.
#[must_use]
pub fn rotation_targets(models: &ModelDescriptors) -> Vec<RotationTarget> {
    let mut targets: Vec<RotationTarget> = models
        .iter()
        .filter(|(_, descriptor)| !descriptor.fields.is_empty())
        .filter_map(|(model, descriptor)| {
            descriptor.cursor.as_ref().map(|cursor| RotationTarget {
                model: model.clone(),
                fields: descriptor.fields.keys().cloned().collect(),
                cursor: cursor.clone(),
            })
        })
        .collect();
    targets.sort_by(|a, b| a.model.cmp(&b.model));
    targets
}

/// Progress of one migration pass, emitted after every migrated record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport<'a> {
    /// Model being migrated.
    pub model: &'a str,
    /// Records migrated so far.
    pub processed: usize,
    /// Total records counted before the pass started.
    pub total_count: usize,
    /// Time spent on the last record.
    pub duration: Duration,
}

/// Logs a progress report at info level. The default `on_progress` choice
/// for [`visit_records`].
pub fn log_progress(report: &ProgressReport<'_>) {
    info!(
        model = report.model,
        processed = report.processed,
        total = report.total_count,
        duration_ms = report.duration.as_millis() as u64,
        "migrated record"
    );
}

/// Walks every record of a model in cursor order, one at a time.
///
/// `migrate_record` receives the cursor of the last migrated record (`None`
/// on the first call), migrates the next record and returns its cursor.
/// Returning the same cursor it was given signals the end of the table.
/// Returns the number of records migrated.
///
/// # Errors
///
/// Propagates the first error from either closure; records migrated before
/// the failure stay migrated.
pub async fn visit_records<Cursor, E, Count, CountFut, Migrate, MigrateFut>(
    model: &str,
    get_total_count: Count,
    mut migrate_record: Migrate,
    mut on_progress: impl FnMut(&ProgressReport<'_>),
) -> Result<usize, E>
where
    Cursor: Clone + PartialEq,
    Count: FnOnce() -> CountFut,
    CountFut: Future<Output = Result<usize, E>>,
    Migrate: FnMut(Option<Cursor>) -> MigrateFut,
    MigrateFut: Future<Output = Result<Option<Cursor>, E>>,
{
    let total_count = get_total_count().await?;
    if total_count == 0 {
        return Ok(0);
    }
    let mut cursor: Option<Cursor> = None;
    let mut processed = 0;
    loop {
        let tick = Instant::now();
        let next = migrate_record(cursor.clone()).await?;
        if next == cursor {
            break;
        }
        cursor = next;
        processed += 1;
        on_progress(&ProgressReport {
            model,
            processed,
            total_count,
            duration: tick.elapsed(),
        });
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use perdedb::schema::{analyze, SchemaDocument};

    fn models() -> ModelDescriptors {
        let document = SchemaDocument::from_json(
            r#"{
                "models": [
                    {
                        "name": "User",
                        "fields": [
                            {"name": "id", "type": "Int", "isId": true},
                            {"name": "name", "type": "String", "documentation": "@encrypted"}
                        ]
                    },
                    {
                        "name": "Post",
                        "fields": [
                            {"name": "id", "type": "Int", "isId": true},
                            {"name": "title", "type": "String"}
                        ]
                    },
                    {
                        "name": "Secret",
                        "fields": [
                            {"name": "value", "type": "String", "documentation": "@encrypted"}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
        analyze(&document).unwrap()
    }

    #[test]
    fn rotation_targets_require_encrypted_fields_and_a_cursor() {
        let targets = rotation_targets(&models());
        // Post has no encrypted fields, Secret has no cursor.
        assert_eq!(
            targets,
            vec![RotationTarget {
                model: "User".to_string(),
                fields: vec!["name".to_string()],
                cursor: "id".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn visits_every_record_in_cursor_order() {
        let table = [10u64, 20, 30];
        let mut seen = Vec::new();
        let mut reports = Vec::new();
        let processed = visit_records(
            "User",
            || async { Ok::<_, ()>(table.len()) },
            |cursor: Option<u64>| {
                let next = match cursor {
                    None => Some(table[0]),
                    Some(current) => table
                        .iter()
                        .find(|&&id| id > current)
                        .copied()
                        .or(Some(current)),
                };
                seen.push(cursor);
                async move { Ok(next) }
            },
            |report| reports.push((report.processed, report.total_count)),
        )
        .await
        .unwrap();
        assert_eq!(processed, 3);
        assert_eq!(seen, vec![None, Some(10), Some(20), Some(30)]);
        assert_eq!(reports, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn empty_tables_short_circuit() {
        let processed = visit_records(
            "User",
            || async { Ok::<_, ()>(0) },
            |_: Option<u64>| async { panic!("no record should be visited") },
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(processed, 0);
    }

    #[tokio::test]
    async fn errors_interrupt_the_pass() {
        let processed: Result<usize, &str> = visit_records(
            "User",
            || async { Ok(5) },
            |cursor: Option<u64>| async move {
                match cursor {
                    None => Ok(Some(1)),
                    Some(_) => Err("storage failure"),
                }
            },
            |_| {},
        )
        .await;
        assert_eq!(processed, Err("storage failure"));
    }
}
