/// Categories of errors for classification and handling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad configuration, needs user fix
    Configuration,

    /// Invalid input, user error
    Validation,

    /// Resource missing
    NotFound,

    /// Resource exists or is locked
    Conflict,

    /// A bounded resource is full, the caller should back off and retry
    Backpressure,

    /// Network/IO errors, retry possible
    Temporary,

    /// Access denied by the storage backend, needs operator intervention
    Permission,

    /// Bugs, system errors
    Internal,
}

impl ErrorKind {
    /// Whether this error is retryable.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Temporary | Self::Backpressure)
    }

    /// Whether this error can only be resolved by an operator.
    pub fn is_permanent(self) -> bool {
        matches!(self, Self::Permission | Self::Configuration)
    }

    /// Standard exit code for this error category.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Configuration => 78,                    // EX_CONFIG
            Self::Validation => 64,                       // EX_USAGE
            Self::Temporary | Self::Backpressure => 75,   // EX_TEMPFAIL
            Self::NotFound => 66,                         // EX_NOINPUT
            Self::Permission => 77,                       // EX_NOPERM
            _ => 70,                                      // EX_SOFTWARE
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Backpressure => "backpressure",
            Self::Temporary => "temporary",
            Self::Permission => "permission",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
