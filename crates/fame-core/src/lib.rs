//! fame-core — face enrollment and name quiz engine.
//!
//! Detects faces in a photo (SCRFD via ONNX Runtime), crops the chosen face,
//! stores it with a new person record, and drills names with a
//! multiple-choice quiz over everyone who has a face image.

pub mod cropper;
pub mod detector;
pub mod enrollment;
pub mod quiz;
pub mod store;
pub mod types;

pub use detector::{FaceDetector, Orientation, ScrfdDetector};
pub use enrollment::{EnrollmentController, EnrollmentError, EnrollmentState};
pub use quiz::{Advance, OptionState, QuizError, QuizRound, QuizSession};
pub use store::{ImageStore, ImageStoreError, PersonRepository, RepositoryError};
pub use types::{DetectedFace, ImageKind, ImageRef, NormalizedBox, Person, PixelRect};
