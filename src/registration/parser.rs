//! Deep scan of Spatial Registration objects.

use std::collections::HashSet;
use std::path::Path;

use dicom::core::value::Value;
use dicom::object::{open_file, InMemDicomObject};
use dicom_dictionary_std::tags;
use tracing::debug;

use crate::geometry::{is_identity, is_rigid, Matrix4, IDENTITY_TOLERANCE, RIGID_TOLERANCE};

use super::candidate::{matrix_dedup_key, ParsedRegistration, RegistrationCandidate};

/// Nesting guard against pathological sequence recursion.
const MAX_SCAN_DEPTH: usize = 16;

/// Parse a Spatial Registration (or legacy RT) object from a file.
///
/// Returns `None` when the file is missing or unparsable; a readable object
/// always yields a result, even if it contains no candidates.
pub fn parse(path: impl AsRef<Path>) -> Option<ParsedRegistration> {
    let path = path.as_ref();
    match open_file(path) {
        Ok(object) => Some(parse_object(&object, path)),
        Err(err) => {
            debug!(
                "failed to read registration object {}: {}",
                path.display(),
                err
            );
            None
        }
    }
}

/// Parse an already-loaded registration object.
///
/// Collects every 4×4 matrix, Frame of Reference UID and Series Instance UID
/// found anywhere in the object, not just at the standard locations.
pub fn parse_object(object: &InMemDicomObject, path: &Path) -> ParsedRegistration {
    let mut parsed = ParsedRegistration {
        sop_instance_uid: string_value(object, tags::SOP_INSTANCE_UID),
        frame_of_reference: string_value(object, tags::FRAME_OF_REFERENCE_UID),
        file: path.to_path_buf(),
        ..Default::default()
    };

    let target = parsed.frame_of_reference.clone();
    let mut seen_matrices = HashSet::new();
    scan_object(
        object,
        true,
        target.as_deref(),
        None,
        &[],
        0,
        &mut parsed,
        &mut seen_matrices,
    );
    parsed
}

/// Walk one object level: harvest identifiers and matrices, then recurse
/// into every sequence item.
///
/// The Frame of Reference UID of a nested item identifies the *source*
/// (moving) space of matrices inside that item; the top-level UID is the
/// *target* (registered) space. Legacy RT relationship items record the
/// source as RelatedFrameOfReferenceUID instead. `item_series` carries the
/// Series Instance UIDs of the nearest enclosing frame-declaring item,
/// since the standard layout puts series references two levels above the
/// matrix itself.
#[allow(clippy::too_many_arguments)]
fn scan_object(
    object: &InMemDicomObject,
    is_top: bool,
    target: Option<&str>,
    inherited_source: Option<&str>,
    item_series: &[String],
    depth: usize,
    out: &mut ParsedRegistration,
    seen_matrices: &mut HashSet<String>,
) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }

    let level_frame = string_value(object, tags::FRAME_OF_REFERENCE_UID);
    let related_frame = string_value(object, tags::RELATED_FRAME_OF_REFERENCE_UID);

    if let Some(uid) = &level_frame {
        push_unique(&mut out.frame_of_reference_uids, uid);
    }
    if let Some(uid) = &related_frame {
        push_unique(&mut out.frame_of_reference_uids, uid);
    }
    if let Some(uid) = string_value(object, tags::SERIES_INSTANCE_UID) {
        push_unique(&mut out.series_uids, &uid);
    }

    // A nested level that declares a frame starts a new registration item
    // context; its whole subtree's series references belong to it.
    let is_item_boundary = !is_top && (level_frame.is_some() || related_frame.is_some());
    let boundary_series = is_item_boundary.then(|| collect_series(object, depth));
    let effective_series = boundary_series.as_deref().unwrap_or(item_series);

    let source = related_frame
        .as_deref()
        .or(if is_top { None } else { level_frame.as_deref() })
        .or(inherited_source);

    if let Some(matrix) = matrix_value(object) {
        let referenced_series = if effective_series.is_empty() {
            collect_series(object, depth)
        } else {
            effective_series.to_vec()
        };
        record_candidate(object, matrix, source, target, referenced_series, out, seen_matrices);
    }

    let child_source = if is_top {
        None
    } else {
        level_frame.as_deref().or(inherited_source)
    };

    for element in object {
        if let Value::Sequence(sequence) = element.value() {
            for item in sequence.items() {
                scan_object(
                    item,
                    false,
                    target,
                    child_source,
                    effective_series,
                    depth + 1,
                    out,
                    seen_matrices,
                );
            }
        }
    }
}

fn record_candidate(
    object: &InMemDicomObject,
    matrix: Matrix4,
    source: Option<&str>,
    target: Option<&str>,
    referenced_series: Vec<String>,
    out: &mut ParsedRegistration,
    seen_matrices: &mut HashSet<String>,
) {
    if !matrix.iter().all(|v| v.is_finite()) {
        out.notes.push(format!(
            "discarded matrix with non-finite components in {}",
            out.file.display()
        ));
        return;
    }
    if !seen_matrices.insert(matrix_dedup_key(&matrix)) {
        return;
    }

    let matrix_type = string_value(object, tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX_TYPE);
    let rigid =
        is_identity(&matrix, IDENTITY_TOLERANCE) || is_rigid(&matrix, RIGID_TOLERANCE);
    if !rigid {
        out.notes.push(format!(
            "non-rigid matrix (type {:?}) in {}",
            matrix_type,
            out.file.display()
        ));
    }

    out.candidates.push(RegistrationCandidate {
        matrix,
        source_frame_of_reference: source.map(str::to_owned),
        target_frame_of_reference: target.map(str::to_owned),
        referenced_series,
        matrix_type,
        rigid,
        file: out.file.clone(),
    });
}

/// Every Series Instance UID within an item's subtree, deduplicated.
fn collect_series(object: &InMemDicomObject, depth: usize) -> Vec<String> {
    let mut series = Vec::new();
    if depth > MAX_SCAN_DEPTH {
        return series;
    }
    if let Some(uid) = string_value(object, tags::SERIES_INSTANCE_UID) {
        push_unique(&mut series, &uid);
    }
    for element in object {
        if let Value::Sequence(sequence) = element.value() {
            for item in sequence.items() {
                for uid in collect_series(item, depth + 1) {
                    push_unique(&mut series, &uid);
                }
            }
        }
    }
    series
}

fn matrix_value(object: &InMemDicomObject) -> Option<Matrix4> {
    let element = object
        .element(tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX)
        .ok()?;
    let values = element.to_multi_float64().ok()?;
    if values.len() != 16 {
        return None;
    }
    let mut matrix = [0.0; 16];
    matrix.copy_from_slice(&values);
    Some(matrix)
}

fn string_value(object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
    let element = object.element(tag).ok()?;
    let text = element.to_str().ok()?;
    let trimmed = text.trim_end_matches(|c| c == '\0' || c == ' ');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::IDENTITY;
    use crate::registration::select_matrix;

    use dicom::core::value::DataSetSequence;
    use dicom::core::{DataElement, PrimitiveValue, VR};

    fn translated(x: f64) -> Matrix4 {
        let mut m = IDENTITY;
        m[3] = x;
        m
    }

    fn matrix_item(matrix: &Matrix4) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX,
                VR::DS,
                PrimitiveValue::F64(matrix.to_vec().into()),
            ),
            DataElement::new(
                tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX_TYPE,
                VR::CS,
                PrimitiveValue::from("RIGID"),
            ),
        ])
    }

    fn registration_item(source_frame: &str, matrices: &[Matrix4]) -> InMemDicomObject {
        let matrix_items: Vec<_> = matrix_items(matrices);
        let matrix_registration = InMemDicomObject::from_element_iter([DataElement::new(
            tags::MATRIX_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(matrix_items),
        )]);
        InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::FRAME_OF_REFERENCE_UID,
                VR::UI,
                PrimitiveValue::from(source_frame),
            ),
            DataElement::new(
                tags::MATRIX_REGISTRATION_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![matrix_registration]),
            ),
        ])
    }

    fn matrix_items(matrices: &[Matrix4]) -> Vec<InMemDicomObject> {
        matrices.iter().map(matrix_item).collect()
    }

    fn registration_object(target_frame: &str, items: Vec<InMemDicomObject>) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::SOP_INSTANCE_UID,
                VR::UI,
                PrimitiveValue::from("1.2.840.999.1"),
            ),
            DataElement::new(
                tags::FRAME_OF_REFERENCE_UID,
                VR::UI,
                PrimitiveValue::from(target_frame),
            ),
            DataElement::new(
                tags::REGISTRATION_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(items),
            ),
        ])
    }

    #[test]
    fn parses_nested_matrices_with_direction_context() {
        let object = registration_object(
            "for.A",
            vec![
                registration_item("for.B", &[translated(10.0)]),
                registration_item("for.C", &[translated(-4.0)]),
            ],
        );
        let parsed = parse_object(&object, Path::new("reg.dcm"));

        assert_eq!(parsed.sop_instance_uid.as_deref(), Some("1.2.840.999.1"));
        assert_eq!(parsed.frame_of_reference.as_deref(), Some("for.A"));
        assert_eq!(parsed.candidates.len(), 2);

        let first = &parsed.candidates[0];
        assert_eq!(first.source_frame_of_reference.as_deref(), Some("for.B"));
        assert_eq!(first.target_frame_of_reference.as_deref(), Some("for.A"));
        assert_eq!(first.matrix_type.as_deref(), Some("RIGID"));
        assert!(first.rigid);

        assert_eq!(
            parsed.frame_of_reference_uids,
            vec!["for.A", "for.B", "for.C"]
        );
    }

    #[test]
    fn deduplicates_matrices_across_items() {
        let object = registration_object(
            "for.A",
            vec![
                registration_item("for.B", &[translated(10.0)]),
                registration_item("for.C", &[translated(10.0)]),
            ],
        );
        let parsed = parse_object(&object, Path::new("reg.dcm"));
        assert_eq!(parsed.candidates.len(), 1);
    }

    #[test]
    fn non_rigid_matrix_is_flagged_not_corrected() {
        let mut scaled = IDENTITY;
        scaled[0] = 2.0;
        let object = registration_object("for.A", vec![registration_item("for.B", &[scaled])]);
        let parsed = parse_object(&object, Path::new("reg.dcm"));

        let candidate = &parsed.candidates[0];
        assert!(!candidate.rigid);
        // Returned unmodified: no projection or cleanup
        assert_eq!(candidate.matrix[0], 2.0);
        assert!(!parsed.notes.is_empty());
    }

    #[test]
    fn collects_identifiers_from_unexpected_locations() {
        let stray = InMemDicomObject::from_element_iter([DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("series.42"),
        )]);
        let item = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::FRAME_OF_REFERENCE_UID,
                VR::UI,
                PrimitiveValue::from("for.B"),
            ),
            DataElement::new(
                tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX,
                VR::DS,
                PrimitiveValue::F64(translated(3.0).to_vec().into()),
            ),
            DataElement::new(
                tags::REFERENCED_SERIES_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![stray]),
            ),
        ]);
        let object = registration_object("for.A", vec![item]);
        let parsed = parse_object(&object, Path::new("reg.dcm"));

        assert_eq!(parsed.series_uids, vec!["series.42"]);
        assert_eq!(parsed.candidates[0].referenced_series, vec!["series.42"]);
    }

    #[test]
    fn nested_matrix_inherits_the_items_series_references() {
        // Series references sit on the registration item; the matrix is two
        // sequence levels deeper. The candidate must still see them.
        let referenced = InMemDicomObject::from_element_iter([DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("series.moving"),
        )]);
        let mut item = registration_item("for.B", &[translated(5.0)]);
        item.put(DataElement::new(
            tags::REFERENCED_SERIES_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![referenced]),
        ));
        let object = registration_object("for.A", vec![item]);
        let parsed = parse_object(&object, Path::new("reg.dcm"));

        assert_eq!(
            parsed.candidates[0].referenced_series,
            vec!["series.moving"]
        );
    }

    #[test]
    fn legacy_related_frame_becomes_source() {
        let legacy_item = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::RELATED_FRAME_OF_REFERENCE_UID,
                VR::UI,
                PrimitiveValue::from("for.old"),
            ),
            DataElement::new(
                tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX,
                VR::DS,
                PrimitiveValue::F64(translated(7.0).to_vec().into()),
            ),
        ]);
        let object = registration_object("for.A", vec![legacy_item]);
        let parsed = parse_object(&object, Path::new("reg.dcm"));

        assert_eq!(
            parsed.candidates[0].source_frame_of_reference.as_deref(),
            Some("for.old")
        );
    }

    #[test]
    fn selection_skips_identity_in_reverse_order() {
        let object = registration_object(
            "for.A",
            vec![
                registration_item("for.B", &[translated(10.0)]),
                registration_item("for.C", &[IDENTITY]),
            ],
        );
        let parsed = parse_object(&object, Path::new("reg.dcm"));
        let selected = select_matrix(&parsed).unwrap();
        assert_eq!(selected.matrix[3], 10.0);
    }

    #[test]
    fn missing_file_returns_none() {
        assert!(parse("/definitely/not/here.dcm").is_none());
    }
}
