//! Pick the detected faces that were identified as the reference person.

use crate::types::{DetectedFace, FaceMatch, IdentifyResult};

/// Collect every detected face whose identification candidates include
/// `person_id`, best confidence first.
///
/// Results referring to a face id that was not part of `faces` are skipped.
pub fn find_person(
    results: &[IdentifyResult],
    faces: &[DetectedFace],
    person_id: &str,
) -> Vec<FaceMatch> {
    let mut matches = Vec::new();

    for result in results {
        let Some(face) = faces.iter().find(|f| f.face_id == result.face_id) else {
            tracing::debug!(face_id = %result.face_id, "identify result for unknown face");
            continue;
        };

        for candidate in result.candidates.iter().filter(|c| c.person_id == person_id) {
            matches.push(FaceMatch {
                face: face.clone(),
                confidence: candidate.confidence,
            });
        }
    }

    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    matches
}
