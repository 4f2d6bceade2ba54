//! Storage seams consumed by enrollment: face image blobs and person records.

use crate::types::{ImageRef, Person};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("image not found: {0}")]
    NotFound(ImageRef),
    #[error("image storage failed: {0}")]
    Storage(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("person not found: {0}")]
    NotFound(Uuid),
    #[error("repository backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Durable blob storage for face crops.
pub trait ImageStore {
    /// Persist encoded image bytes under a freshly generated captured key.
    fn save(&mut self, bytes: &[u8]) -> Result<ImageRef, ImageStoreError>;

    /// Load the encoded bytes behind `key`, captured or bundled.
    fn load(&self, key: &ImageRef) -> Result<Vec<u8>, ImageStoreError>;

    /// Delete a captured image. Bundled assets are left untouched.
    fn remove(&mut self, key: &ImageRef) -> Result<(), ImageStoreError>;
}

/// CRUD over person records.
pub trait PersonRepository {
    fn create(
        &mut self,
        id: Uuid,
        name: &str,
        image: Option<ImageRef>,
    ) -> Result<Person, RepositoryError>;

    fn get(&self, id: Uuid) -> Result<Option<Person>, RepositoryError>;

    /// All people in ascending name order.
    fn list(&self) -> Result<Vec<Person>, RepositoryError>;

    fn update(&mut self, id: Uuid, name: &str) -> Result<Person, RepositoryError>;

    fn delete(&mut self, id: Uuid) -> Result<(), RepositoryError>;
}
