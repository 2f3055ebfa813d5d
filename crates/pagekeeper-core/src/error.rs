//! Error types for `pagekeeper-core`.
//!
//! Load-time problems never surface here: a store that cannot read or parse
//! its stored copy falls back to its defaults and logs a warning. These
//! errors cover the write paths and the administrative operations whose
//! failures the caller must see.

use pagekeeper_storage::StorageError;

/// Errors from document store writes (content, settings, gallery, log).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write does not fit in storage even after cleanup and a retry.
    #[error("storage exhausted writing '{key}': {reason}")]
    StorageExhausted { key: String, reason: String },

    /// The document could not be serialized.
    #[error("failed to serialize '{key}': {reason}")]
    Serialization { key: String, reason: String },

    /// A list operation referenced a section that does not hold a list.
    #[error("section '{section}' has no item list at '{field}'")]
    MissingList { section: String, field: String },

    /// A list item or section value had the wrong shape.
    #[error("invalid item: {reason}")]
    InvalidItem { reason: String },

    /// A document update produced a value of the wrong shape.
    #[error("invalid document: {reason}")]
    InvalidDocument { reason: String },

    /// The underlying storage backend returned an error.
    #[error("store storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from importing a document from its exported JSON form.
///
/// An import that fails leaves the store untouched.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The text is not valid JSON.
    #[error("import is not valid JSON: {reason}")]
    Parse { reason: String },

    /// The JSON is valid but is not an object.
    #[error("import must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    /// The merged document could not be committed.
    #[error("import could not be saved: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the image gallery.
#[derive(Debug, thiserror::Error)]
pub enum GalleryError {
    /// The MIME type is not one of the accepted image formats.
    #[error("unsupported image format '{mime}': use JPEG, PNG, GIF or WebP")]
    UnsupportedFormat { mime: String },

    /// The image is larger than the upload limit.
    #[error("image is {size} bytes, maximum is {max} bytes")]
    TooLarge { size: usize, max: usize },

    /// The gallery list could not be saved.
    #[error("gallery store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from administrative credential operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Username or password did not match, with a human-readable reason.
    #[error("credential mismatch: {reason}")]
    CredentialMismatch { reason: String },

    /// Too many consecutive failed logins.
    #[error("login locked after {attempts} failed attempts")]
    LockedOut { attempts: u32 },

    /// The proposed credentials break the validation rules.
    #[error("invalid credentials: {}", errors.join(", "))]
    Invalid { errors: Vec<String> },

    /// No credentials have been set up yet.
    #[error("no administrator credentials configured")]
    NotConfigured,

    /// Credentials already exist and cannot be bootstrapped again.
    #[error("administrator credentials are already configured")]
    AlreadyConfigured,

    /// Password hashing or hash parsing failed.
    #[error("password hashing failed: {reason}")]
    Hashing { reason: String },

    /// The credential record could not be saved.
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the visitor log.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A page URL could not be parsed.
    #[error("invalid page url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The log could not be saved.
    #[error("visitor log store error: {0}")]
    Store(#[from] StoreError),
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        Self::Store(StoreError::Storage(err))
    }
}

impl From<StorageError> for GalleryError {
    fn from(err: StorageError) -> Self {
        Self::Store(StoreError::Storage(err))
    }
}

impl From<StorageError> for TrackerError {
    fn from(err: StorageError) -> Self {
        Self::Store(StoreError::Storage(err))
    }
}
