use snafu::Snafu;
use tributary_ingestor_core::{IngestorError, converter::ConversionError};
use tributary_observability::ObservabilityError;
use tributary_resources::{ErrorKind, OptionsError};
use tributary_schema::CatalogError;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Invalid {name} argument: {message}"))]
    InvalidArgument { name: &'static str, message: String },
    #[snafu(display("Invalid options"))]
    Options { source: OptionsError },
    #[snafu(display("Object store error"))]
    ObjectStore { source: object_store::Error },
    #[snafu(display("Schema catalog error"))]
    Catalog { source: CatalogError },
    #[snafu(display("Pipeline error"))]
    Ingestor { source: IngestorError },
    #[snafu(display("Failed to read block"))]
    Conversion { source: ConversionError },
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },
    #[snafu(display("JSON error"))]
    Json { source: serde_json::Error },
    #[snafu(display("Failed to initialize observability"))]
    Observability { source: ObservabilityError },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

impl CliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::Validation,
            Self::Options { source } => source.kind(),
            Self::ObjectStore { .. } => ErrorKind::Configuration,
            Self::Catalog { source } => source.kind(),
            Self::Ingestor { source } => source.kind(),
            Self::Conversion { source } => source.kind(),
            Self::Io { source } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            Self::Io { .. } => ErrorKind::Internal,
            Self::Json { .. } => ErrorKind::Internal,
            Self::Observability { .. } => ErrorKind::Configuration,
        }
    }
}
