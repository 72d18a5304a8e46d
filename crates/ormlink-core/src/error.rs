//! Error types for ormlink operations.

use std::fmt;

/// The primary error type for all ormlink operations.
#[derive(Debug)]
pub enum Error {
    /// Mapping/registration errors (misconfiguration, never retried)
    Mapping(MappingError),
    /// Errors passed through unmodified from the connection collaborator
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// A lifecycle trigger aborted the operation
    Trigger {
        /// Entity whose trigger failed
        entity: String,
        /// Lifecycle event name
        event: &'static str,
        /// Message returned by the callback
        message: String,
    },
    /// Metadata document (de)serialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

/// A configuration error detected while registering or using mappings.
#[derive(Debug, Clone)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    /// Class or entity the error refers to
    pub entity: String,
    /// Attribute, column, event or relationship name, where applicable
    pub name: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// A column name was registered twice on one entity
    DuplicateColumn,
    /// Trigger event name outside the fixed lifecycle set
    InvalidTriggerName,
    /// Trigger callback could not be resolved to an invocable function
    InvalidCallback,
    /// Relationship attribute declares no associated target class
    MissingAssociatedClass,
    /// Attribute or column absent from the class it was looked up on
    UnknownAttribute,
    /// Neither primary key nor unique columns identify the row
    PrimaryKeyUnresolvable,
    /// Relationship lookup by name failed
    UnknownRelationship,
    /// No entity mapping registered for the class or entity name
    UnknownEntity,
    /// A second mapping was registered for an already mapped class
    DuplicateEntity,
    /// Name is not a valid identifier
    InvalidIdentifier,
    /// Cascade recursion exceeded the configured depth
    CascadeDepthExceeded,
    /// Join columns do not line up one-to-one with the key they reference
    JoinColumnArity,
}

impl MappingErrorKind {
    /// Stable name of this error kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MappingErrorKind::DuplicateColumn => "DuplicateColumnError",
            MappingErrorKind::InvalidTriggerName => "InvalidTriggerNameError",
            MappingErrorKind::InvalidCallback => "InvalidCallbackError",
            MappingErrorKind::MissingAssociatedClass => "MissingAssociatedClassError",
            MappingErrorKind::UnknownAttribute => "UnknownAttributeError",
            MappingErrorKind::PrimaryKeyUnresolvable => "PrimaryKeyUnresolvableError",
            MappingErrorKind::UnknownRelationship => "UnknownRelationshipError",
            MappingErrorKind::UnknownEntity => "UnknownEntityError",
            MappingErrorKind::DuplicateEntity => "DuplicateEntityError",
            MappingErrorKind::InvalidIdentifier => "InvalidIdentifierError",
            MappingErrorKind::CascadeDepthExceeded => "CascadeDepthExceededError",
            MappingErrorKind::JoinColumnArity => "JoinColumnArityError",
        }
    }
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// Rendered statement, if available
    pub statement: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Deadlock detected
    Deadlock,
    /// Statement timeout
    Timeout,
    /// Operation not supported by this connection
    Unsupported,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl MappingError {
    fn new(
        kind: MappingErrorKind,
        entity: impl Into<String>,
        name: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            entity: entity.into(),
            name,
            message: message.into(),
        }
    }
}

impl Error {
    pub fn duplicate_column(entity: &str, column: &str) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::DuplicateColumn,
            entity,
            Some(column.to_string()),
            format!("column '{column}' is already mapped on '{entity}'"),
        ))
    }

    pub fn invalid_trigger_name(entity: &str, event: &str) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::InvalidTriggerName,
            entity,
            Some(event.to_string()),
            format!(
                "'{event}' is not a lifecycle event (expected one of before_insert, after_insert, \
                 before_update, after_update, before_delete, after_delete, on_fetch)"
            ),
        ))
    }

    pub fn invalid_callback(entity: &str, event: &str, callback: &str) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::InvalidCallback,
            entity,
            Some(event.to_string()),
            format!("callback '{callback}' for '{entity}.{event}' is not a registered function"),
        ))
    }

    pub fn missing_associated_class(owner: &str, attribute: &str) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::MissingAssociatedClass,
            owner,
            Some(attribute.to_string()),
            format!("attribute '{owner}.{attribute}' declares no associated class"),
        ))
    }

    pub fn unknown_attribute(class: &str, attribute: &str) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::UnknownAttribute,
            class,
            Some(attribute.to_string()),
            format!("'{class}' has no attribute or column '{attribute}'"),
        ))
    }

    pub fn primary_key_unresolvable(entity: &str, relationship: Option<&str>) -> Self {
        let message = match relationship {
            Some(rel) => format!(
                "cannot resolve primary key of '{entity}' for relationship '{rel}': \
                 no primary key or unique column values match"
            ),
            None => format!(
                "cannot resolve primary key of '{entity}': no primary key or unique column values match"
            ),
        };
        Error::Mapping(MappingError::new(
            MappingErrorKind::PrimaryKeyUnresolvable,
            entity,
            relationship.map(str::to_string),
            message,
        ))
    }

    pub fn unknown_relationship(class: &str, name: &str) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::UnknownRelationship,
            class,
            Some(name.to_string()),
            format!("'{class}' has no relationship '{name}'"),
        ))
    }

    pub fn unknown_entity(name: &str) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::UnknownEntity,
            name,
            None,
            format!("no entity mapping registered for '{name}'"),
        ))
    }

    pub fn duplicate_entity(class: &str) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::DuplicateEntity,
            class,
            None,
            format!("class '{class}' already has an entity mapping"),
        ))
    }

    pub fn invalid_identifier(entity: &str, name: &str) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::InvalidIdentifier,
            entity,
            Some(name.to_string()),
            format!("'{name}' is not a valid identifier (on '{entity}')"),
        ))
    }

    pub fn cascade_depth_exceeded(entity: &str, limit: usize) -> Self {
        Error::Mapping(MappingError::new(
            MappingErrorKind::CascadeDepthExceeded,
            entity,
            None,
            format!("cascade from '{entity}' exceeded the maximum depth of {limit}"),
        ))
    }

    pub fn join_column_arity(entity: &str, relationship: &str, columns: &[String], key: &[String]) -> Self {
        let shown = if columns.is_empty() {
            "no columns".to_string()
        } else {
            format!("({})", columns.join(", "))
        };
        Error::Mapping(MappingError::new(
            MappingErrorKind::JoinColumnArity,
            entity,
            Some(relationship.to_string()),
            format!(
                "relationship '{relationship}' joins '{entity}' on {shown} but the referenced key is ({})",
                key.join(", ")
            ),
        ))
    }

    /// Kind of mapping error, if this is one.
    pub fn mapping_kind(&self) -> Option<MappingErrorKind> {
        match self {
            Error::Mapping(m) => Some(m.kind),
            _ => None,
        }
    }

    /// Is this a retryable error? Only connection-layer conditions qualify;
    /// nothing in this layer retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Deadlock | QueryErrorKind::Timeout),
            _ => false,
        }
    }

    /// Get the statement that caused this error, if available
    pub fn statement(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.statement.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mapping(e) => write!(f, "{}: {}", e.kind.as_str(), e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Trigger {
                entity,
                event,
                message,
            } => write!(f, "Trigger '{entity}.{event}' failed: {message}"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stmt) = &self.statement {
            write!(f, "{} ({})", self.message, stmt)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for ormlink operations.
pub type Result<T> = std::result::Result<T, Error>;
