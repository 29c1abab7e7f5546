use snafu::Snafu;
use tributary_resources::ErrorKind;

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum CatalogError {
    #[snafu(display("{resource} not found: {message}"))]
    NotFound {
        resource: &'static str,
        message: String,
    },
    #[snafu(display("invalid schema for {table}: {message}"))]
    InvalidSchema { table: String, message: String },
}

pub type Result<T, E = CatalogError> = ::std::result::Result<T, E>;

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidSchema { .. } => ErrorKind::Validation,
        }
    }
}
