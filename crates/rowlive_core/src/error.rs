//! Error types for rowlive core.

use rowlive_store::StoreError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in rowlive core operations.
///
/// Every variant except [`CoreError::BackingStore`] is raised before any
/// state is mutated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Store gateway error.
    #[error("backing store error: {0}")]
    BackingStore(#[from] StoreError),

    /// Missing or invalid construction arguments.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// The table is already mirrored in this context.
    #[error("there is already a mirror of {table}")]
    DuplicateRegistration {
        /// The table name.
        table: String,
    },

    /// An item with the same key already exists.
    #[error("{column} {key} already exists in {table}")]
    DuplicateKey {
        /// The table name.
        table: String,
        /// The primary identifier column.
        column: String,
        /// The duplicated key.
        key: String,
    },

    /// The two collections are already linked on this key.
    #[error("{source_table} and {target_table} are already linked using {key}")]
    DuplicateLink {
        /// The owning (source) table.
        source_table: String,
        /// The linked (target) table.
        target_table: String,
        /// The foreign key column.
        key: String,
    },

    /// A link would overwrite an existing attribute.
    #[error("attribute {attribute} already exists on {table} {key}")]
    AttributeCollision {
        /// The owning table.
        table: String,
        /// The item key.
        key: String,
        /// The attribute name.
        attribute: String,
    },

    /// A field was assigned an invalid value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// The field name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Caller-supplied values lack a required field.
    #[error("{field} needs to have a value in {table}")]
    MissingField {
        /// The table name.
        table: String,
        /// The missing field.
        field: String,
    },

    /// A stored row lacks a required key column.
    #[error("{table} {key} does not have the key {column}")]
    MissingKey {
        /// The table name.
        table: String,
        /// The row key, when known.
        key: String,
        /// The missing column.
        column: String,
    },

    /// The field is not a column of the table.
    #[error("{table} has no field {field}")]
    UnknownField {
        /// The table name.
        table: String,
        /// The unknown field.
        field: String,
    },

    /// Identifier fields cannot be reassigned.
    #[error("{field} identifies rows of {table} and cannot be changed")]
    IdentifierImmutable {
        /// The table name.
        table: String,
        /// The identifier field.
        field: String,
    },

    /// A mutation was called on a branch.
    #[error("{operation} was called on a branch of {table}; call it on the root collection")]
    BranchMutation {
        /// The table name.
        table: String,
        /// The rejected operation.
        operation: &'static str,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The context has been closed.
    #[error("context is closed")]
    ContextClosed,
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            table: table.into(),
            field: field.into(),
        }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            table: table.into(),
            field: field.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
