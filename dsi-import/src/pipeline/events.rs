//! `*_events.tsv` ingestion and HED tag storage

use crate::catalog::Catalog;
use crate::dataset::dictionary::{DataDictionary, PropertyAnnotation};
use crate::dataset::tsv::{cell, number_cell, TsvFile, TsvRow};
use crate::error::{ImportError, ImportResult};
use crate::error_group::ErrorGroup;
use crate::hed::{parse_tag_groups, HedVocabulary, TagGroup};
use dsi_common::db::{NewEvent, TagGroupRow, TagSource};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// Columns with a dedicated event field
const KNOWN_COLUMNS: [&str; 7] = [
    "onset",
    "duration",
    "trial_type",
    "response_time",
    "channel",
    "HED",
    "hed",
];

/// Flatten parsed groups into rows, numbering from `next_position`
///
/// `next_position` is advanced past the last row so that several annotations
/// can share one source.
pub fn tag_rows(
    groups: &[TagGroup],
    property: Option<&PropertyAnnotation<'_>>,
    next_position: &mut i64,
) -> Vec<TagGroupRow> {
    let mut rows = Vec::new();
    for member in groups.iter().flatten() {
        rows.push(TagGroupRow {
            position: *next_position,
            hed_tag_id: member.tag_id,
            tag_value: member.value.clone(),
            has_pairing: member.has_pairing,
            additional_members: member.additional_members as i64,
            property_name: property.map(|p| p.property_name.to_string()),
            property_value: property.and_then(|p| p.property_value.map(str::to_string)),
            description: property.and_then(|p| p.description.map(str::to_string)),
        });
        *next_position += 1;
    }
    rows
}

/// Parse and store every HED annotation of a data dictionary
///
/// Annotations are all attempted; failures come back as one grouped error.
pub async fn store_dictionary_tags<C: Catalog + ?Sized>(
    catalog: &mut C,
    source: TagSource,
    dictionary: &DataDictionary,
    vocabulary: &HedVocabulary,
) -> ImportResult<usize> {
    let mut group = ErrorGroup::new();
    let mut rows = Vec::new();
    let mut position = 0;

    for annotation in dictionary.hed_annotations() {
        if let Some(groups) = group.record(parse_tag_groups(annotation.hed, vocabulary)) {
            rows.extend(tag_rows(groups, Some(&annotation), &mut position));
        }
    }
    group.finish(format!("HED annotations of '{}'", dictionary.path.display()))?;

    catalog.insert_tag_group_rows(source, &rows).await?;
    debug!(source = source.kind(), id = source.id(), members = rows.len(), "Stored HED tags");
    Ok(rows.len())
}

/// Store every row of an events table, with its per-row HED annotation
pub async fn ingest_events<C: Catalog + ?Sized>(
    catalog: &mut C,
    file_id: i64,
    table_path: &Path,
    catalog_path: &str,
    vocabulary: &HedVocabulary,
) -> ImportResult<usize> {
    let table = TsvFile::read(table_path)?;
    let mut group = ErrorGroup::new();

    for row in &table.rows {
        group.record(ingest_row(catalog, file_id, row, table_path, catalog_path, vocabulary).await);
    }

    let stored = group.finish(format!("events of '{}'", table_path.display()))?;
    debug!(file_id, events = stored.len(), "Stored events");
    Ok(stored.len())
}

async fn ingest_row<C: Catalog + ?Sized>(
    catalog: &mut C,
    file_id: i64,
    row: &TsvRow,
    table_path: &Path,
    catalog_path: &str,
    vocabulary: &HedVocabulary,
) -> ImportResult<i64> {
    let onset = number_cell(row, "onset", table_path)?
        .ok_or_else(|| ImportError::invalid_data(table_path.display(), "event without onset"))?;
    let duration = number_cell(row, "duration", table_path)?
        .ok_or_else(|| ImportError::invalid_data(table_path.display(), "event without duration"))?;
    if duration < 0.0 {
        return Err(ImportError::invalid_data(
            table_path.display(),
            format!("negative duration {} at onset {}", duration, onset),
        ));
    }

    // Parse before inserting so a bad annotation leaves no event behind
    let hed = cell(row, "HED").or_else(|| cell(row, "hed"));
    let groups = match hed {
        Some(hed) => parse_tag_groups(hed, vocabulary)?,
        None => Vec::new(),
    };

    let channel_id = match cell(row, "channel") {
        Some(channel) => catalog.find_channel(file_id, channel).await?,
        None => None,
    };

    let extra: Map<String, Value> = row
        .iter()
        .filter(|(column, _)| !KNOWN_COLUMNS.contains(&column.as_str()))
        .filter_map(|(column, _)| cell(row, column).map(|v| (column.clone(), Value::from(v))))
        .collect();

    let event_id = catalog
        .insert_event(&NewEvent {
            file_id,
            channel_id,
            file_path: catalog_path.to_string(),
            onset,
            duration,
            trial_type: cell(row, "trial_type").map(str::to_string),
            response_time: number_cell(row, "response_time", table_path)?,
            extra_columns: (!extra.is_empty()).then(|| Value::Object(extra).to_string()),
        })
        .await?;

    if !groups.is_empty() {
        let mut position = 0;
        let rows = tag_rows(&groups, None, &mut position);
        catalog.insert_tag_group_rows(TagSource::Event(event_id), &rows).await?;
    }

    Ok(event_id)
}
