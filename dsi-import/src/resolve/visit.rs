use crate::catalog::{Catalog, Vocabulary};
use crate::dataset::VisitInfo;
use crate::error::{ImportError, ImportResult};
use dsi_common::db::{CatalogSubject, CatalogVisit, NewVisit};
use tracing::{debug, info};

/// Visit label of a dataset visit, falling back to the configured default
pub fn visit_label(info: &VisitInfo, default_label: Option<&str>) -> ImportResult<String> {
    info.visit_label
        .as_deref()
        .or(default_label)
        .map(str::to_string)
        .ok_or_else(|| {
            ImportError::missing_field(
                "visit label",
                format!(
                    "subject '{}' without sessions (no default visit label configured)",
                    info.subject.label
                ),
            )
        })
}

/// Resolve a dataset visit to its catalog row, creating it when allowed
///
/// New visits take their site and project from the subject and their cohort
/// from the participant record.
pub async fn resolve_or_create_visit<C: Catalog + ?Sized>(
    catalog: &mut C,
    subject: &CatalogSubject,
    info: &VisitInfo,
    allow_create: bool,
    default_label: Option<&str>,
) -> ImportResult<CatalogVisit> {
    let label = visit_label(info, default_label)?;

    if let Some(visit) = catalog.find_visit(subject.id, &label).await? {
        debug!(subject = %subject.label, visit = %label, "Visit found");
        return Ok(visit);
    }

    if !allow_create {
        return Err(ImportError::NotFound(format!(
            "visit '{}' of subject '{}' (creation disabled)",
            label, subject.label
        )));
    }

    let context = format!("visit '{}' of subject '{}'", label, subject.label);
    let cohort_name = info
        .subject
        .participant
        .as_ref()
        .ok_or_else(|| ImportError::missing_field("participants.tsv row", context.as_str()))?
        .cohort
        .as_deref()
        .ok_or_else(|| ImportError::missing_field("cohort", context.as_str()))?;

    let cohort = catalog
        .find_named(Vocabulary::Cohort, cohort_name)
        .await?
        .ok_or_else(|| ImportError::NotFound(format!("cohort '{}'", cohort_name)))?;

    let visit = catalog
        .insert_visit(&NewVisit {
            subject_id: subject.id,
            visit_label: label,
            site_id: subject.site_id,
            project_id: subject.project_id,
            cohort_id: cohort.id,
        })
        .await?;

    info!(
        subject = %subject.label,
        visit = %visit.visit_label,
        cohort = %cohort.name,
        "Created visit"
    );
    Ok(visit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SubjectInfo;

    fn info(visit_label: Option<&str>) -> VisitInfo {
        VisitInfo {
            subject: SubjectInfo {
                label: "01".to_string(),
                participant: None,
            },
            visit_label: visit_label.map(str::to_string),
        }
    }

    #[test]
    fn test_visit_label_fallback() {
        assert_eq!(visit_label(&info(Some("V2")), Some("V1")).unwrap(), "V2");
        assert_eq!(visit_label(&info(None), Some("V1")).unwrap(), "V1");
        assert!(matches!(
            visit_label(&info(None), None),
            Err(ImportError::MissingRequiredField { .. })
        ));
    }
}
