use crate::catalog::{AliasedVocabulary, Catalog};
use crate::dataset::participants::ParticipantRecord;
use crate::dataset::SubjectInfo;
use crate::error::{ImportError, ImportResult};
use crate::error_group::group_three;
use dsi_common::db::{AliasedEntity, CatalogSubject, NewSubject};
use rand::Rng;
use std::ops::RangeInclusive;
use tracing::{debug, info};

/// Range of generated internal subject identifiers
pub const CAND_ID_RANGE: RangeInclusive<i64> = 100_000..=999_999;

/// Resolve a dataset subject to its catalog row, creating it when allowed
///
/// A purely numeric label is an internal identifier: it is looked up as such
/// and never created. Any other label is looked up as an external label.
pub async fn resolve_or_create_subject<C: Catalog + ?Sized>(
    catalog: &mut C,
    info: &SubjectInfo,
    allow_create: bool,
    registered_by: &str,
) -> ImportResult<CatalogSubject> {
    if let Ok(cand_id) = info.label.parse::<i64>() {
        return catalog
            .find_subject_by_cand_id(cand_id)
            .await?
            .ok_or_else(|| {
                ImportError::NotFound(format!("subject with identifier {}", cand_id))
            });
    }

    if let Some(subject) = catalog.find_subject_by_label(&info.label).await? {
        debug!(subject = %info.label, cand_id = subject.cand_id, "Subject found");
        return Ok(subject);
    }

    if !allow_create {
        return Err(ImportError::NotFound(format!(
            "subject '{}' (creation disabled)",
            info.label
        )));
    }

    let context = format!("subject '{}'", info.label);
    let participant = info
        .participant
        .as_ref()
        .ok_or_else(|| ImportError::missing_field("participants.tsv row", context.as_str()))?;

    let project = required_aliased(catalog, AliasedVocabulary::Project, participant, &context).await;
    let site = required_aliased(catalog, AliasedVocabulary::Site, participant, &context).await;
    let sex = optional_sex(catalog, participant).await;
    let (project, site, sex) = group_three(context.as_str(), project, site, sex)?;

    let cand_id = generate_cand_id(catalog).await?;
    let subject = catalog
        .insert_subject(&NewSubject {
            cand_id,
            label: info.label.clone(),
            date_of_birth: participant
                .date_of_birth
                .map(|date| date.format("%Y-%m-%d").to_string()),
            sex,
            site_id: site.id,
            project_id: project.id,
            registered_by: registered_by.to_string(),
        })
        .await?;

    info!(
        subject = %subject.label,
        cand_id = subject.cand_id,
        site = %site.name,
        project = %project.name,
        "Created subject"
    );
    Ok(subject)
}

async fn required_aliased<C: Catalog + ?Sized>(
    catalog: &mut C,
    vocabulary: AliasedVocabulary,
    participant: &ParticipantRecord,
    context: &str,
) -> ImportResult<AliasedEntity> {
    let value = match vocabulary {
        AliasedVocabulary::Project => participant.project.as_deref(),
        AliasedVocabulary::Site => participant.site.as_deref(),
    };
    let name = value.ok_or_else(|| ImportError::missing_field(vocabulary.label(), context))?;

    catalog
        .find_aliased(vocabulary, name)
        .await?
        .ok_or_else(|| ImportError::NotFound(format!("{} '{}'", vocabulary.label(), name)))
}

async fn optional_sex<C: Catalog + ?Sized>(
    catalog: &mut C,
    participant: &ParticipantRecord,
) -> ImportResult<Option<String>> {
    let Some(raw) = participant.sex.as_deref() else {
        return Ok(None);
    };
    let name = normalize_sex(raw);
    match catalog.find_sex(&name).await? {
        Some(sex) => Ok(Some(sex)),
        None => Err(ImportError::NotFound(format!("sex '{}'", raw))),
    }
}

/// Map the common dataset spellings onto the catalog's sex names
pub fn normalize_sex(value: &str) -> String {
    match value.trim().to_ascii_lowercase().as_str() {
        "m" | "male" => "Male".to_string(),
        "f" | "female" => "Female".to_string(),
        "o" | "other" => "Other".to_string(),
        _ => value.trim().to_string(),
    }
}

/// Draw a random identifier not yet used by any subject
pub async fn generate_cand_id<C: Catalog + ?Sized>(catalog: &mut C) -> ImportResult<i64> {
    loop {
        let candidate = rand::thread_rng().gen_range(CAND_ID_RANGE);
        if catalog.find_subject_by_cand_id(candidate).await?.is_none() {
            return Ok(candidate);
        }
        debug!(candidate, "Identifier already taken, drawing again");
    }
}
