//! `*_channels.tsv` ingestion

use crate::catalog::{Catalog, Vocabulary};
use crate::dataset::tsv::{cell, number_cell, required_cell, TsvFile, TsvRow};
use crate::error::{ImportError, ImportResult};
use crate::error_group::ErrorGroup;
use crate::report::RunReport;
use dsi_common::db::NewChannel;
use std::path::Path;
use tracing::debug;

/// Store every channel row of a channels table
///
/// Rows are independent: all of them are attempted and failures are returned
/// as one grouped error. Type and status names must match the catalog
/// vocabulary exactly; unknown ones are also noted in the run report.
pub async fn ingest_channels<C: Catalog + ?Sized>(
    catalog: &mut C,
    file_id: i64,
    table_path: &Path,
    catalog_path: &str,
    report: &mut RunReport,
) -> ImportResult<usize> {
    let table = TsvFile::read(table_path)?;
    let mut group = ErrorGroup::new();

    for row in &table.rows {
        group.record(ingest_row(catalog, file_id, row, table_path, catalog_path, report).await);
    }

    let stored = group.finish(format!("channels of '{}'", table_path.display()))?;
    debug!(file_id, channels = stored.len(), "Stored channels");
    Ok(stored.len())
}

async fn ingest_row<C: Catalog + ?Sized>(
    catalog: &mut C,
    file_id: i64,
    row: &TsvRow,
    table_path: &Path,
    catalog_path: &str,
    report: &mut RunReport,
) -> ImportResult<i64> {
    let name = required_cell(row, "name", table_path)?;
    let type_name = required_cell(row, "type", table_path)?;
    let unit = required_cell(row, "units", table_path)?;
    let status_name = cell(row, "status");

    let channel_type = catalog.find_named(Vocabulary::ChannelType, type_name).await?;
    let status_type = match status_name {
        Some(status) => Some(catalog.find_named(Vocabulary::StatusType, status).await?),
        None => None,
    };

    let mut errors = Vec::new();
    let channel_type_id = match channel_type {
        Some(channel_type) => Some(channel_type.id),
        None => {
            report.note_unknown_channel_type(type_name);
            errors.push(ImportError::NotFound(format!("channel type '{}'", type_name)));
            None
        }
    };
    let status_type_id = match (status_type, status_name) {
        (Some(Some(status)), _) => Some(status.id),
        (Some(None), Some(status)) => {
            report.note_unknown_status_type(status);
            errors.push(ImportError::NotFound(format!("channel status '{}'", status)));
            None
        }
        _ => None,
    };

    let Some(channel_type_id) = channel_type_id.filter(|_| errors.is_empty()) else {
        return Err(ImportError::Grouped {
            label: format!("channel '{}'", name),
            errors,
        });
    };

    let channel = NewChannel {
        file_id,
        channel_type_id,
        status_type_id,
        file_path: catalog_path.to_string(),
        name: name.to_string(),
        description: cell(row, "description").map(str::to_string),
        sampling_frequency: number_cell(row, "sampling_frequency", table_path)?
            .map(|hz| hz.round() as i64),
        low_cutoff: number_cell(row, "low_cutoff", table_path)?,
        high_cutoff: number_cell(row, "high_cutoff", table_path)?,
        notch: cell(row, "notch")
            .and_then(|value| value.parse::<f64>().ok())
            .map(|hz| hz.round() as i64),
        status_description: cell(row, "status_description").map(str::to_string),
        unit: Some(unit.to_string()),
    };

    catalog.insert_channel(&channel).await
}
