use thiserror::Error;

/// Errors raised while reading or patching a binary variable document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before a complete value could be read
    #[error("Document truncated at offset {offset}")]
    Truncated {
        /// Offset at which more bytes were expected
        offset: usize,
    },

    /// A value of a different shape was found where another was expected
    #[error("Expected {expected} at offset {offset}, found marker 0x{marker:02x}")]
    UnexpectedMarker {
        /// What the reader was looking for
        expected: &'static str,
        /// The marker byte that was found
        marker: u8,
        /// Offset of the marker
        offset: usize,
    },

    /// The reserved MessagePack marker was encountered
    #[error("Reserved marker at offset {0}")]
    ReservedMarker(usize),

    /// An array index was outside the encoded array
    #[error("Index {index} is out of bounds for array of length {len}")]
    IndexOutOfBounds {
        /// The requested index
        index: usize,
        /// The number of elements in the array
        len: usize,
    },

    /// A map key was not valid UTF-8
    #[error("Invalid UTF-8 in key at offset {0}")]
    InvalidUtf8(usize),

    /// Encoding failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// Decoding into a structured value failed
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Error type for the Cascade BPMN runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Element instance not found
    #[error("Element instance not found: {0}")]
    ElementInstanceNotFound(u64),

    /// Process definition not found
    #[error("Process definition not found: {0}")]
    ProcessNotFound(String),

    /// Element not found in a deployed process
    #[error("Element '{element_id}' not found in process '{process_id}'")]
    ElementNotFound {
        /// The process that was searched
        process_id: String,
        /// The missing element
        element_id: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// An event could not be attributed to the body or its inner activity
    #[error("Element classification error: {0}")]
    ElementClassification(String),

    /// A multi-instance body without its inner activity
    #[error("Multi-instance body '{0}' has no inner activity")]
    MissingInnerActivity(String),

    /// The input collection did not evaluate to an array
    #[error("Invalid input collection: {0}")]
    InvalidInputCollection(String),

    /// The input collection exceeds the configured maximum
    #[error("Input collection of '{element_id}' has {size} items, the maximum is {max}")]
    InputCollectionTooLarge {
        /// The body element
        element_id: String,
        /// The size of the evaluated collection
        size: usize,
        /// The configured maximum
        max: usize,
    },

    /// The output collection could not be read or patched
    #[error("Output collection error: {0}")]
    OutputCollection(String),

    /// Binary document error
    #[error("Document error: {0}")]
    Codec(#[from] CodecError),

    /// A token was consumed on a scope that owns none
    #[error("No active token left to consume on element instance {0}")]
    TokenUnderflow(u64),

    /// Termination could not reconcile the tokens of a scope
    #[error(
        "Cannot reconcile {active_tokens} active tokens of element instance {key} with {reconciled} terminated children"
    )]
    TokenReconciliation {
        /// The terminating scope
        key: u64,
        /// Tokens owned by the scope
        active_tokens: u32,
        /// Children accounted for by termination
        reconciled: u32,
    },

    /// Expression evaluation error
    #[error("Expression evaluation error: {0}")]
    ExpressionError(String),

    /// A command was issued for an instance in the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Variable store error
    #[error("Variable store error: {0}")]
    VariableStoreError(String),

    /// Catch event subscription error
    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Classification recorded on the incident raised for this error
    pub fn incident_type(&self) -> &'static str {
        match self {
            EngineError::InvalidInputCollection(_)
            | EngineError::InputCollectionTooLarge { .. }
            | EngineError::ExpressionError(_) => "EXTRACT_VALUE_ERROR",
            EngineError::ElementClassification(_)
            | EngineError::MissingInnerActivity(_)
            | EngineError::ElementNotFound { .. }
            | EngineError::ValidationError(_) => "STRUCTURAL_DEFECT",
            EngineError::OutputCollection(_)
            | EngineError::Codec(_)
            | EngineError::SerializationError(_) => "IO_MAPPING_ERROR",
            EngineError::TokenUnderflow(_) | EngineError::TokenReconciliation { .. } => {
                "TOKEN_ACCOUNTING_ERROR"
            }
            _ => "UNKNOWN",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(err: String) -> Self {
        EngineError::Other(err)
    }
}

impl From<&str> for EngineError {
    fn from(err: &str) -> Self {
        EngineError::Other(err.to_string())
    }
}
