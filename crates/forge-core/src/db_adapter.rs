//! Adapter layer for forge-db infrastructure.
//!
//! This module bridges forge-db implementations with forge-core's domain types:
//! error conversion from `DbError` to `ForgeError`.
//!
//! ## Architecture
//!
//! ```text
//! forge-core domain code (knowledge)
//!        ↓
//!   db_adapter (this module) - conversions
//!        ↓
//!     forge-db implementations (flat vector index, descriptors)
//! ```

use forge_db::DbError;

use crate::errors::ForgeError;

// ============================================================================
// Error Conversion
// ============================================================================

/// Convert a forge-db error to a forge-core error.
pub fn from_db_error(err: DbError) -> ForgeError {
    match err {
        DbError::Io(io_err) => ForgeError::Io(io_err),

        DbError::VectorIo { path, message } => ForgeError::KbCacheIo { path, message },

        DbError::VectorParse { path, message } | DbError::Descriptor { path, message } => {
            ForgeError::KbCacheParse { path, message }
        }

        DbError::DimensionMismatch { expected, actual } => ForgeError::StaleIndex {
            reason: format!(
                "index dimension is {}, embedding model produces {}",
                expected, actual
            ),
        },

        DbError::IndexNotFound { path } => ForgeError::KbCacheIo {
            path,
            message: "no persisted vectors".to_string(),
        },

        DbError::Json(json_err) => ForgeError::Json(json_err),

        DbError::Internal { message } => ForgeError::Other(anyhow::anyhow!(message)),
    }
}

/// Extension trait to convert forge-db Result to Result<T, ForgeError>.
pub trait IntoForgeDbResult<T> {
    /// Convert a forge-db result to a ForgeError result.
    fn into_forge_result(self) -> Result<T, ForgeError>;
}

impl<T> IntoForgeDbResult<T> for Result<T, DbError> {
    fn into_forge_result(self) -> Result<T, ForgeError> {
        self.map_err(from_db_error)
    }
}
