//! Enrollment — photo → detected faces → chosen face → stored person.
//!
//! ```text
//! Idle ─load_photo─▶ PhotoLoaded ─apply_detection─┬▶ NoFacesFound
//!                                                 ├▶ FaceChosen (one detection)
//!                                                 └▶ MultipleFacesPendingSelection
//! MultipleFacesPendingSelection ─select_face─▶ FaceChosen ─save─▶ Saved
//! ```
//!
//! Detection is split into a [`DetectionRequest`] that can be executed on a
//! worker thread and a [`DetectionOutcome`] fed back into the controller.
//! Each request carries the session generation; outcomes from a cancelled or
//! superseded photo are dropped.

use crate::cropper::{self, CropError};
use crate::detector::{DetectorError, FaceDetector, Orientation};
use crate::store::{ImageStore, ImageStoreError, PersonRepository, RepositoryError};
use crate::types::{DetectedFace, NormalizedBox, Person};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// JPEG quality used when persisting a chosen face crop.
pub const JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("could not decode photo: {0}")]
    Decode(#[source] image::ImageError),
    #[error("face detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("a name is required")]
    MissingName,
    #[error("no face has been selected")]
    NoFaceSelected,
    #[error("no candidate face at {0}")]
    UnknownCandidate(NormalizedBox),
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("could not encode face crop: {0}")]
    Encode(#[source] image::ImageError),
    #[error("could not store face image: {0}")]
    Storage(#[source] ImageStoreError),
    #[error("could not create person: {0}")]
    Repository(#[source] RepositoryError),
}

/// Observable state of one enrollment session.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentState {
    Idle,
    PhotoLoaded,
    NoFacesFound,
    MultipleFacesPendingSelection {
        candidates: Vec<DetectedFace>,
    },
    FaceChosen {
        chosen: DetectedFace,
        candidates: Vec<DetectedFace>,
    },
    Saved {
        person: Person,
    },
}

impl EnrollmentState {
    pub fn name(&self) -> &'static str {
        match self {
            EnrollmentState::Idle => "idle",
            EnrollmentState::PhotoLoaded => "photo loaded",
            EnrollmentState::NoFacesFound => "no faces found",
            EnrollmentState::MultipleFacesPendingSelection { .. } => "pending face selection",
            EnrollmentState::FaceChosen { .. } => "face chosen",
            EnrollmentState::Saved { .. } => "saved",
        }
    }

    /// Faces the user can choose from, if any.
    pub fn candidates(&self) -> &[DetectedFace] {
        match self {
            EnrollmentState::MultipleFacesPendingSelection { candidates }
            | EnrollmentState::FaceChosen { candidates, .. } => candidates,
            _ => &[],
        }
    }
}

/// Single-shot detection job for the current photo.
pub struct DetectionRequest {
    generation: u64,
    image: Arc<DynamicImage>,
    orientation: Orientation,
}

impl DetectionRequest {
    /// Run the detector. Safe to call off the controlling thread.
    pub fn run(self, detector: &mut dyn FaceDetector) -> DetectionOutcome {
        let result = detector.detect(&self.image, self.orientation);
        DetectionOutcome {
            generation: self.generation,
            result,
        }
    }
}

/// Result of a [`DetectionRequest`], to be applied on the controlling thread.
pub struct DetectionOutcome {
    generation: u64,
    result: Result<Vec<NormalizedBox>, DetectorError>,
}

/// Drives a single enrollment flow.
pub struct EnrollmentController {
    state: EnrollmentState,
    generation: u64,
    photo: Option<(Arc<DynamicImage>, Orientation)>,
}

impl Default for EnrollmentController {
    fn default() -> Self {
        Self::new()
    }
}

impl EnrollmentController {
    pub fn new() -> Self {
        Self {
            state: EnrollmentState::Idle,
            generation: 0,
            photo: None,
        }
    }

    pub fn state(&self) -> &EnrollmentState {
        &self.state
    }

    /// Decode a picked photo and prepare its detection job.
    ///
    /// Any previous photo, candidates and pending detection are discarded.
    pub fn load_photo(
        &mut self,
        bytes: &[u8],
        orientation: Orientation,
    ) -> Result<DetectionRequest, EnrollmentError> {
        self.ensure_not_saved("load a photo")?;
        self.reset();

        let image = image::load_from_memory(bytes).map_err(|e| {
            tracing::warn!(error = %e, "photo decode failed");
            EnrollmentError::Decode(e)
        })?;
        tracing::info!(
            width = image.width(),
            height = image.height(),
            ?orientation,
            generation = self.generation,
            "photo loaded"
        );

        let image = Arc::new(image);
        self.photo = Some((Arc::clone(&image), orientation));
        self.state = EnrollmentState::PhotoLoaded;

        Ok(DetectionRequest {
            generation: self.generation,
            image,
            orientation,
        })
    }

    /// Run detection inline on the calling thread.
    pub fn run_detection(
        &mut self,
        request: DetectionRequest,
        detector: &mut dyn FaceDetector,
    ) -> Result<&EnrollmentState, EnrollmentError> {
        let outcome = request.run(detector);
        self.apply_detection(outcome)
    }

    /// Feed a detection result back into the session.
    ///
    /// Outcomes for a photo that is no longer current are ignored.
    pub fn apply_detection(
        &mut self,
        outcome: DetectionOutcome,
    ) -> Result<&EnrollmentState, EnrollmentError> {
        if outcome.generation != self.generation || self.state != EnrollmentState::PhotoLoaded {
            tracing::debug!(
                outcome = outcome.generation,
                current = self.generation,
                state = self.state.name(),
                "ignoring stale detection result"
            );
            return Ok(&self.state);
        }

        let Some((image, orientation)) = self.photo.take() else {
            return Ok(&self.state);
        };

        let boxes = match outcome.result {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::error!(error = %e, "face detector failed");
                self.state = EnrollmentState::Idle;
                return Err(EnrollmentError::Detection(e));
            }
        };

        let image = Arc::try_unwrap(image).unwrap_or_else(|shared| (*shared).clone());
        let upright = orientation.apply(image);
        let candidates = crop_candidates(&upright, &boxes);
        tracing::info!(
            detected = boxes.len(),
            usable = candidates.len(),
            "face detection applied"
        );

        self.state = match (boxes.len(), candidates.len()) {
            (_, 0) => EnrollmentState::NoFacesFound,
            (1, _) => EnrollmentState::FaceChosen {
                chosen: candidates[0].clone(),
                candidates,
            },
            _ => EnrollmentState::MultipleFacesPendingSelection { candidates },
        };
        Ok(&self.state)
    }

    /// Choose one of several detected faces by its bounding box.
    pub fn select_face(
        &mut self,
        bounding_box: &NormalizedBox,
    ) -> Result<&EnrollmentState, EnrollmentError> {
        let selectable = match &self.state {
            EnrollmentState::MultipleFacesPendingSelection { .. } => true,
            EnrollmentState::FaceChosen { candidates, .. } => candidates.len() > 1,
            _ => false,
        };
        if !selectable {
            return Err(self.invalid("select a face"));
        }

        let chosen = self
            .state
            .candidates()
            .iter()
            .find(|face| face.bounding_box == *bounding_box)
            .cloned()
            .ok_or(EnrollmentError::UnknownCandidate(*bounding_box))?;

        let candidates = self.state.candidates().to_vec();
        tracing::info!(bbox = %chosen.bounding_box, "face selected");
        self.state = EnrollmentState::FaceChosen { chosen, candidates };
        Ok(&self.state)
    }

    /// Persist the chosen face and create the person record.
    ///
    /// The image is stored first; the person is only created once the image
    /// write succeeded. On failure the session stays in `FaceChosen` so the
    /// save can be retried.
    pub fn save(
        &mut self,
        name: &str,
        images: &mut dyn ImageStore,
        people: &mut dyn PersonRepository,
    ) -> Result<Person, EnrollmentError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EnrollmentError::MissingName);
        }

        let chosen = match &self.state {
            EnrollmentState::FaceChosen { chosen, .. } => chosen,
            EnrollmentState::Saved { .. } => return Err(self.invalid("save")),
            _ => return Err(EnrollmentError::NoFaceSelected),
        };

        let bytes = encode_jpeg(&chosen.image).map_err(EnrollmentError::Encode)?;
        let key = images.save(&bytes).map_err(|e| {
            tracing::error!(error = %e, "face image write failed; person not created");
            EnrollmentError::Storage(e)
        })?;

        let person = match people.create(Uuid::new_v4(), name, Some(key.clone())) {
            Ok(person) => person,
            Err(e) => {
                tracing::error!(error = %e, image = %key, "person create failed after image write");
                if let Err(cleanup) = images.remove(&key) {
                    tracing::warn!(error = %cleanup, image = %key, "orphaned face image left in store");
                }
                return Err(EnrollmentError::Repository(e));
            }
        };

        tracing::info!(id = %person.id, name = %person.name, image = %key, "person enrolled");
        self.state = EnrollmentState::Saved {
            person: person.clone(),
        };
        Ok(person)
    }

    /// Abandon the session, dropping the photo and all detected faces.
    pub fn cancel(&mut self) {
        tracing::debug!(state = self.state.name(), "enrollment cancelled");
        self.reset();
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.photo = None;
        self.state = EnrollmentState::Idle;
    }

    fn ensure_not_saved(&self, operation: &'static str) -> Result<(), EnrollmentError> {
        match self.state {
            EnrollmentState::Saved { .. } => Err(self.invalid(operation)),
            _ => Ok(()),
        }
    }

    fn invalid(&self, operation: &'static str) -> EnrollmentError {
        EnrollmentError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

/// Crop every detection, dropping those with unusable geometry.
fn crop_candidates(image: &DynamicImage, boxes: &[NormalizedBox]) -> Vec<DetectedFace> {
    boxes
        .iter()
        .filter_map(|bbox| match cropper::crop(image, bbox) {
            Ok(face) => Some(DetectedFace {
                bounding_box: *bbox,
                image: face,
            }),
            Err(CropError::InvalidGeometry { .. }) => {
                tracing::warn!(%bbox, "dropping face with unusable crop region");
                None
            }
        })
        .collect()
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageRef;
    use image::{GenericImageView, ImageFormat};
    use std::collections::HashMap;
    use std::io::Cursor;

    /// Detector that replays a fixed answer.
    struct ScriptedDetector {
        boxes: Option<Vec<NormalizedBox>>,
        calls: usize,
    }

    impl ScriptedDetector {
        fn faces(boxes: Vec<NormalizedBox>) -> Self {
            Self { boxes: Some(boxes), calls: 0 }
        }

        fn failing() -> Self {
            Self { boxes: None, calls: 0 }
        }
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(
            &mut self,
            _image: &DynamicImage,
            _orientation: Orientation,
        ) -> Result<Vec<NormalizedBox>, DetectorError> {
            self.calls += 1;
            self.boxes
                .clone()
                .ok_or_else(|| DetectorError::InferenceFailed("scripted failure".into()))
        }
    }

    #[derive(Default)]
    struct MemoryImages {
        images: HashMap<ImageRef, Vec<u8>>,
        fail_writes: bool,
    }

    impl ImageStore for MemoryImages {
        fn save(&mut self, bytes: &[u8]) -> Result<ImageRef, ImageStoreError> {
            if self.fail_writes {
                return Err(ImageStoreError::Storage(std::io::Error::other("disk full")));
            }
            let key = ImageRef::generate_captured();
            self.images.insert(key.clone(), bytes.to_vec());
            Ok(key)
        }

        fn load(&self, key: &ImageRef) -> Result<Vec<u8>, ImageStoreError> {
            self.images
                .get(key)
                .cloned()
                .ok_or_else(|| ImageStoreError::NotFound(key.clone()))
        }

        fn remove(&mut self, key: &ImageRef) -> Result<(), ImageStoreError> {
            self.images.remove(key);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryPeople {
        people: Vec<Person>,
        fail_creates: bool,
    }

    impl PersonRepository for MemoryPeople {
        fn create(
            &mut self,
            id: Uuid,
            name: &str,
            image: Option<ImageRef>,
        ) -> Result<Person, RepositoryError> {
            if self.fail_creates {
                return Err(RepositoryError::Backend("database locked".into()));
            }
            let person = Person { id, name: name.to_string(), image };
            self.people.push(person.clone());
            Ok(person)
        }

        fn get(&self, id: Uuid) -> Result<Option<Person>, RepositoryError> {
            Ok(self.people.iter().find(|p| p.id == id).cloned())
        }

        fn list(&self) -> Result<Vec<Person>, RepositoryError> {
            let mut people = self.people.clone();
            people.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(people)
        }

        fn update(&mut self, id: Uuid, name: &str) -> Result<Person, RepositoryError> {
            let person = self
                .people
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or(RepositoryError::NotFound(id))?;
            person.name = name.to_string();
            Ok(person.clone())
        }

        fn delete(&mut self, id: Uuid) -> Result<(), RepositoryError> {
            self.people.retain(|p| p.id != id);
            Ok(())
        }
    }

    fn photo_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn face_a() -> NormalizedBox {
        NormalizedBox::new(0.1, 0.1, 0.3, 0.3)
    }

    fn face_b() -> NormalizedBox {
        NormalizedBox::new(0.6, 0.5, 0.3, 0.3)
    }

    fn outside() -> NormalizedBox {
        NormalizedBox::new(2.0, 2.0, 0.2, 0.2)
    }

    fn detect(boxes: Vec<NormalizedBox>) -> EnrollmentController {
        let mut controller = EnrollmentController::new();
        let request = controller.load_photo(&photo_bytes(100, 100), Orientation::Up).unwrap();
        controller
            .run_detection(request, &mut ScriptedDetector::faces(boxes))
            .unwrap();
        controller
    }

    #[test]
    fn test_no_detections_reaches_no_faces_found() {
        let controller = detect(vec![]);
        assert_eq!(controller.state(), &EnrollmentState::NoFacesFound);
    }

    #[test]
    fn test_single_detection_is_auto_selected() {
        let controller = detect(vec![face_a()]);
        match controller.state() {
            EnrollmentState::FaceChosen { chosen, candidates } => {
                assert_eq!(chosen.bounding_box, face_a());
                assert_eq!(candidates.len(), 1);
                assert_eq!(chosen.image.dimensions(), (30, 30));
            }
            other => panic!("expected FaceChosen, got {other:?}"),
        }
    }

    #[test]
    fn test_single_unusable_detection_counts_as_none() {
        let controller = detect(vec![outside()]);
        assert_eq!(controller.state(), &EnrollmentState::NoFacesFound);
    }

    #[test]
    fn test_multiple_detections_drop_invalid_geometry() {
        let controller = detect(vec![face_a(), outside(), face_b()]);
        match controller.state() {
            EnrollmentState::MultipleFacesPendingSelection { candidates } => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(candidates[0].bounding_box, face_a());
                assert_eq!(candidates[1].bounding_box, face_b());
            }
            other => panic!("expected pending selection, got {other:?}"),
        }
    }

    #[test]
    fn test_multiple_unusable_detections_fall_back_to_no_faces() {
        let controller = detect(vec![outside(), NormalizedBox::new(0.5, 0.5, 0.0, 0.1)]);
        assert_eq!(controller.state(), &EnrollmentState::NoFacesFound);
    }

    #[test]
    fn test_decode_error_returns_to_idle() {
        let mut controller = EnrollmentController::new();
        let err = controller
            .load_photo(b"definitely not an image", Orientation::Up)
            .err()
            .unwrap();
        assert!(matches!(err, EnrollmentError::Decode(_)));
        assert_eq!(controller.state(), &EnrollmentState::Idle);
    }

    #[test]
    fn test_detector_failure_returns_to_idle() {
        let mut controller = EnrollmentController::new();
        let request = controller.load_photo(&photo_bytes(50, 50), Orientation::Up).unwrap();
        let err = controller
            .run_detection(request, &mut ScriptedDetector::failing())
            .err()
            .unwrap();
        assert!(matches!(err, EnrollmentError::Detection(_)));
        assert_eq!(controller.state(), &EnrollmentState::Idle);
    }

    #[test]
    fn test_outcome_after_cancel_is_ignored() {
        let mut controller = EnrollmentController::new();
        let request = controller.load_photo(&photo_bytes(50, 50), Orientation::Up).unwrap();
        let mut detector = ScriptedDetector::faces(vec![face_a()]);
        let outcome = request.run(&mut detector);

        controller.cancel();
        controller.apply_detection(outcome).unwrap();
        assert_eq!(controller.state(), &EnrollmentState::Idle);
        assert_eq!(detector.calls, 1);
    }

    #[test]
    fn test_outcome_for_superseded_photo_is_ignored() {
        let mut controller = EnrollmentController::new();
        let first = controller.load_photo(&photo_bytes(50, 50), Orientation::Up).unwrap();
        let second = controller.load_photo(&photo_bytes(80, 80), Orientation::Up).unwrap();

        let stale = first.run(&mut ScriptedDetector::faces(vec![face_a(), face_b()]));
        controller.apply_detection(stale).unwrap();
        assert_eq!(controller.state(), &EnrollmentState::PhotoLoaded);

        let fresh = second.run(&mut ScriptedDetector::faces(vec![]));
        controller.apply_detection(fresh).unwrap();
        assert_eq!(controller.state(), &EnrollmentState::NoFacesFound);
    }

    #[test]
    fn test_orientation_is_applied_before_cropping() {
        let mut controller = EnrollmentController::new();
        let request = controller.load_photo(&photo_bytes(40, 10), Orientation::Right).unwrap();
        controller
            .run_detection(request, &mut ScriptedDetector::faces(vec![NormalizedBox::new(0.0, 0.0, 1.0, 0.5)]))
            .unwrap();
        match controller.state() {
            // Upright image is 10x40; the lower half is 10x20.
            EnrollmentState::FaceChosen { chosen, .. } => {
                assert_eq!(chosen.image.dimensions(), (10, 20))
            }
            other => panic!("expected FaceChosen, got {other:?}"),
        }
    }

    #[test]
    fn test_select_face_by_bounding_box() {
        let mut controller = detect(vec![face_a(), face_b()]);
        controller.select_face(&face_b()).unwrap();
        match controller.state() {
            EnrollmentState::FaceChosen { chosen, candidates } => {
                assert_eq!(chosen.bounding_box, face_b());
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected FaceChosen, got {other:?}"),
        }

        // Re-selection among several candidates is allowed.
        controller.select_face(&face_a()).unwrap();
        assert!(matches!(
            controller.state(),
            EnrollmentState::FaceChosen { chosen, .. } if chosen.bounding_box == face_a()
        ));
    }

    #[test]
    fn test_select_unknown_face_fails() {
        let mut controller = detect(vec![face_a(), face_b()]);
        let err = controller
            .select_face(&NormalizedBox::new(0.0, 0.0, 0.1, 0.1))
            .err()
            .unwrap();
        assert!(matches!(err, EnrollmentError::UnknownCandidate(_)));
        assert!(matches!(
            controller.state(),
            EnrollmentState::MultipleFacesPendingSelection { .. }
        ));
    }

    #[test]
    fn test_select_face_requires_candidates() {
        let mut controller = EnrollmentController::new();
        assert!(matches!(
            controller.select_face(&face_a()),
            Err(EnrollmentError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_save_rejects_blank_name() {
        let mut controller = detect(vec![face_a()]);
        let mut images = MemoryImages::default();
        let mut people = MemoryPeople::default();

        for name in ["", "   ", "\t\n"] {
            let err = controller.save(name, &mut images, &mut people).err().unwrap();
            assert!(matches!(err, EnrollmentError::MissingName));
        }
        assert!(people.people.is_empty());
        assert!(images.images.is_empty());
        assert!(matches!(controller.state(), EnrollmentState::FaceChosen { .. }));
    }

    #[test]
    fn test_save_without_face_fails() {
        let mut controller = detect(vec![face_a(), face_b()]);
        let err = controller
            .save("Alice", &mut MemoryImages::default(), &mut MemoryPeople::default())
            .err()
            .unwrap();
        assert!(matches!(err, EnrollmentError::NoFaceSelected));
    }

    #[test]
    fn test_save_stores_image_then_person() {
        let mut controller = detect(vec![face_a(), face_b()]);
        controller.select_face(&face_a()).unwrap();
        let mut images = MemoryImages::default();
        let mut people = MemoryPeople::default();

        let person = controller.save("  Alice ", &mut images, &mut people).unwrap();

        assert_eq!(person.name, "Alice");
        let key = person.image.clone().unwrap();
        assert!(key.as_str().starts_with("uuid-"));
        let stored = image::load_from_memory(&images.load(&key).unwrap()).unwrap();
        assert_eq!(stored.dimensions(), (30, 30));
        assert_eq!(people.people, vec![person.clone()]);
        assert_eq!(controller.state(), &EnrollmentState::Saved { person });
    }

    #[test]
    fn test_storage_failure_creates_no_person() {
        let mut controller = detect(vec![face_a()]);
        let mut images = MemoryImages { fail_writes: true, ..Default::default() };
        let mut people = MemoryPeople::default();

        let err = controller.save("Bob", &mut images, &mut people).err().unwrap();
        assert!(matches!(err, EnrollmentError::Storage(_)));
        assert!(people.people.is_empty());
        assert!(matches!(controller.state(), EnrollmentState::FaceChosen { .. }));

        // The user may retry once storage recovers.
        images.fail_writes = false;
        controller.save("Bob", &mut images, &mut people).unwrap();
        assert_eq!(people.people.len(), 1);
    }

    #[test]
    fn test_repository_failure_removes_stored_image() {
        let mut controller = detect(vec![face_a()]);
        let mut images = MemoryImages::default();
        let mut people = MemoryPeople { fail_creates: true, ..Default::default() };

        let err = controller.save("Carol", &mut images, &mut people).err().unwrap();
        assert!(matches!(err, EnrollmentError::Repository(_)));
        assert!(images.images.is_empty());
    }

    #[test]
    fn test_saved_session_is_terminal() {
        let mut controller = detect(vec![face_a()]);
        controller
            .save("Dana", &mut MemoryImages::default(), &mut MemoryPeople::default())
            .unwrap();

        assert!(matches!(
            controller.load_photo(&photo_bytes(10, 10), Orientation::Up),
            Err(EnrollmentError::InvalidState { .. })
        ));
        assert!(matches!(
            controller.save("Dana", &mut MemoryImages::default(), &mut MemoryPeople::default()),
            Err(EnrollmentError::InvalidState { .. })
        ));
    }
}
