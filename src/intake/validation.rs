//! Report/schedule submission validation (spec §6): the rules the intake
//! enforces so the core can rely on them unconditionally.

use crate::error::EngineError;
use crate::model::{Compression, ReduceSpec, ReportFormat};
use crate::reduce::validate_reduce_spec;
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static regex is valid"));

/// The report-shape fields shared by a job submission and a schedule body
/// (spec §6: "schedule CRUD, enforcing the same report-shape validation as
/// job submission").
pub struct ReportShape<'a> {
    pub format: ReportFormat,
    pub include_formats: Option<&'a [ReportFormat]>,
    pub compression: Option<Compression>,
    pub reduce_spec: Option<&'a ReduceSpec>,
    pub source_collection: Option<&'a str>,
    pub allowlist: &'a [String],
}

pub fn validate_report_shape(shape: &ReportShape) -> Result<(), EngineError> {
    match (shape.format, shape.include_formats) {
        (ReportFormat::Archive, None) => return Err(EngineError::ArchiveRequiresIncludeFormats),
        (ReportFormat::Archive, Some(formats)) if formats.is_empty() => {
            return Err(EngineError::ArchiveRequiresIncludeFormats)
        }
        (ReportFormat::Archive, Some(formats)) => {
            let mut seen = std::collections::HashSet::new();
            if !formats.iter().all(|f| seen.insert(*f)) {
                return Err(EngineError::DuplicateIncludeFormats);
            }
        }
        (_, Some(_)) => return Err(EngineError::IncludeFormatsNotAllowed),
        (_, None) => {}
    }

    if shape.format == ReportFormat::Archive && shape.compression == Some(Compression::Zip) {
        return Err(EngineError::CompressionArchiveConflict);
    }

    if let Some(name) = shape.source_collection {
        if !IDENTIFIER_RE.is_match(name) || !shape.allowlist.iter().any(|c| c == name) {
            return Err(EngineError::SourceCollectionNotAllowed {
                name: name.to_string(),
            });
        }
    }

    if let Some(reduce_spec) = shape.reduce_spec {
        validate_reduce_spec(reduce_spec)?;
        validate_identifiers(reduce_spec)?;
    }

    Ok(())
}

fn validate_identifiers(spec: &ReduceSpec) -> Result<(), EngineError> {
    for field in &spec.group_by {
        check_identifier(field)?;
    }
    for metric in &spec.metrics {
        check_identifier(&metric.alias)?;
        if let Some(field) = &metric.field {
            check_identifier(field)?;
        }
    }
    Ok(())
}

fn check_identifier(value: &str) -> Result<(), EngineError> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(EngineError::ReduceValidation {
            message: format!("'{value}' is not a valid identifier"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricOp, MetricSpec};

    #[test]
    fn archive_requires_include_formats() {
        let allowlist = vec![];
        let shape = ReportShape {
            format: ReportFormat::Archive,
            include_formats: None,
            compression: None,
            reduce_spec: None,
            source_collection: None,
            allowlist: &allowlist,
        };
        assert!(matches!(
            validate_report_shape(&shape),
            Err(EngineError::ArchiveRequiresIncludeFormats)
        ));
    }

    #[test]
    fn include_formats_forbidden_outside_archive() {
        let allowlist = vec![];
        let formats = vec![ReportFormat::Delimited];
        let shape = ReportShape {
            format: ReportFormat::Delimited,
            include_formats: Some(&formats),
            compression: None,
            reduce_spec: None,
            source_collection: None,
            allowlist: &allowlist,
        };
        assert!(matches!(
            validate_report_shape(&shape),
            Err(EngineError::IncludeFormatsNotAllowed)
        ));
    }

    #[test]
    fn rejects_duplicate_include_formats() {
        let allowlist = vec![];
        let formats = vec![ReportFormat::Delimited, ReportFormat::Delimited];
        let shape = ReportShape {
            format: ReportFormat::Archive,
            include_formats: Some(&formats),
            compression: None,
            reduce_spec: None,
            source_collection: None,
            allowlist: &allowlist,
        };
        assert!(matches!(
            validate_report_shape(&shape),
            Err(EngineError::DuplicateIncludeFormats)
        ));
    }

    #[test]
    fn rejects_zip_compression_with_archive() {
        let allowlist = vec![];
        let formats = vec![ReportFormat::Delimited];
        let shape = ReportShape {
            format: ReportFormat::Archive,
            include_formats: Some(&formats),
            compression: Some(Compression::Zip),
            reduce_spec: None,
            source_collection: None,
            allowlist: &allowlist,
        };
        assert!(matches!(
            validate_report_shape(&shape),
            Err(EngineError::CompressionArchiveConflict)
        ));
    }

    #[test]
    fn rejects_source_collection_outside_allowlist() {
        let allowlist = vec!["orders".to_string()];
        let shape = ReportShape {
            format: ReportFormat::Delimited,
            include_formats: None,
            compression: None,
            reduce_spec: None,
            source_collection: Some("other"),
            allowlist: &allowlist,
        };
        assert!(matches!(
            validate_report_shape(&shape),
            Err(EngineError::SourceCollectionNotAllowed { .. })
        ));
    }

    #[test]
    fn rejects_reduce_spec_with_unsafe_identifier() {
        let allowlist = vec![];
        let reduce_spec = ReduceSpec {
            group_by: vec!["status; DROP TABLE".to_string()],
            metrics: vec![MetricSpec {
                op: MetricOp::Count,
                alias: "total".to_string(),
                field: None,
            }],
        };
        let shape = ReportShape {
            format: ReportFormat::Delimited,
            include_formats: None,
            compression: None,
            reduce_spec: Some(&reduce_spec),
            source_collection: None,
            allowlist: &allowlist,
        };
        assert!(validate_report_shape(&shape).is_err());
    }

    #[test]
    fn accepts_a_well_formed_reduce_spec() {
        let allowlist = vec!["orders".to_string()];
        let reduce_spec = ReduceSpec {
            group_by: vec!["status".to_string()],
            metrics: vec![MetricSpec {
                op: MetricOp::Count,
                alias: "total".to_string(),
                field: None,
            }],
        };
        let shape = ReportShape {
            format: ReportFormat::Delimited,
            include_formats: None,
            compression: None,
            reduce_spec: Some(&reduce_spec),
            source_collection: Some("orders"),
            allowlist: &allowlist,
        };
        assert!(validate_report_shape(&shape).is_ok());
    }
}
