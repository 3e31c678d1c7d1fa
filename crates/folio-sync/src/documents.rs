//! The document/project store collaborator, as seen by the engine.

use crate::error::DocumentStoreError;
use folio_core::{Document, DocumentId};

/// Setting key holding the id of the document the external app displays.
pub const CURRENT_DOCUMENT_SETTING: &str = "currentDocumentId";

/// Persistent store of documents and settings, owned outside the engine.
pub trait DocumentStore: Send + Sync {
    fn get(&self, id: DocumentId) -> Result<Option<Document>, DocumentStoreError>;

    fn put(&self, document: Document) -> Result<(), DocumentStoreError>;

    fn list(&self) -> Result<Vec<Document>, DocumentStoreError>;

    fn get_setting(&self, key: &str) -> Result<Option<String>, DocumentStoreError>;

    fn set_setting(&self, key: &str, value: &str) -> Result<(), DocumentStoreError>;
}

/// The persisted "current active document", if any.
pub fn current_document_id(
    store: &dyn DocumentStore,
) -> Result<Option<DocumentId>, DocumentStoreError> {
    Ok(store
        .get_setting(CURRENT_DOCUMENT_SETTING)?
        .filter(|id| !id.is_empty())
        .map(|id| DocumentId::intern(&id)))
}
