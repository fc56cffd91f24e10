//! File and project parameters

use crate::catalog::Catalog;
use crate::dataset::sidecar::Metadata;
use crate::error::ImportResult;
use dsi_common::db::{ParameterScope, ParameterType};
use tracing::debug;

pub const MRI_CATEGORY: &str = "MRI Variables";
pub const PHYSIO_CATEGORY: &str = "Electrophysiology Variables";

/// Parameter holding the content hash of the primary file
pub const HASH_PARAMETER: &str = "file_sha256_hash";

/// Add the catalog name of every aliased sidecar key
///
/// Original keys are kept; a catalog name already present in the sidecar is
/// not overwritten.
pub fn apply_aliases(metadata: &Metadata, parameter_types: &[ParameterType]) -> Metadata {
    let mut remapped = metadata.clone();
    for parameter_type in parameter_types {
        let Some(alias) = parameter_type.alias.as_deref() else {
            continue;
        };
        if let Some(value) = metadata.get(alias) {
            if !remapped.contains_key(&parameter_type.name) {
                remapped.insert(parameter_type.name.clone(), value.clone());
            }
        }
    }
    remapped
}

/// Upsert one parameter, creating its type in `category` on first use
pub async fn store_parameter<C: Catalog + ?Sized>(
    catalog: &mut C,
    scope: ParameterScope,
    category: &str,
    name: &str,
    value: Option<&str>,
) -> ImportResult<()> {
    let parameter_type = catalog.ensure_parameter_type(name, category).await?;
    catalog.upsert_parameter(scope, parameter_type.id, value).await
}

/// Upsert every metadata entry, in map order
pub async fn store_metadata<C: Catalog + ?Sized>(
    catalog: &mut C,
    scope: ParameterScope,
    category: &str,
    metadata: &Metadata,
) -> ImportResult<usize> {
    for (name, value) in metadata {
        store_parameter(catalog, scope, category, name, value.render().as_deref()).await?;
    }
    debug!(?scope, count = metadata.len(), "Stored parameters");
    Ok(metadata.len())
}
