use std::fmt;

/// Result type used throughout the operator core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while generating or reconciling dogu resources.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading a key from the configuration store failed for a reason other than a missing key.
    #[error("failed to read configuration key {key}: {source}")]
    ConfigRead {
        /// Key that was read.
        key: String,
        /// Underlying store error.
        source: anyhow::Error,
    },
    /// A configured resource value is not a valid quantity.
    #[error("failed to convert ces unit {value} of type {resource} to quantity")]
    UnitConversion {
        /// Value as found in the configuration.
        value: String,
        /// Resource type the value was read for.
        resource: String,
    },
    /// A volume client block names a type the operator cannot create.
    #[error("unsupported client param type {kind} in volume {volume}")]
    UnsupportedVolumeClient {
        /// Declared client param type.
        kind: String,
        /// Name of the offending volume.
        volume: String,
    },
    /// The generic content of a volume client block cannot be decoded.
    #[error("failed to read client params of volume {volume}: {source}")]
    InvalidVolumeClientParams {
        /// Name of the offending volume.
        volume: String,
        /// Decoding error.
        source: serde_json::Error,
    },
    /// Volume owner or group is not a positive integer.
    #[error("invalid {field} {value} of volume {volume}: must be a positive integer")]
    InvalidVolumeOwnership {
        /// Either `owner` or `group`.
        field: &'static str,
        /// Value as declared.
        value: String,
        /// Name of the offending volume.
        volume: String,
    },
    /// An image environment variable is not of the form `NAME=VALUE`.
    #[error("environment variable [{0}] needs to be in form NAME=VALUE")]
    InvalidEnvVar(String),
    /// The `ADDITIONAL_SERVICES` payload of an image is not valid JSON.
    #[error("failed to parse additional services [{value}]: {source}")]
    InvalidAdditionalServices {
        /// Raw value.
        value: String,
        /// Decoding error.
        source: serde_json::Error,
    },
    /// An image exposed port is not of the form `<port>[/<protocol>]`.
    #[error("invalid exposed port [{0}] in image config")]
    InvalidImagePort(String),
    /// A pre-update validator refused to let an update proceed.
    #[error("validation failed: {0}")]
    ValidationRejected(String),
    /// The owner reference could not be attached to a generated object.
    #[error("failed to set controller reference: {0}")]
    OwnerReference(String),
    /// Kubernetes API error.
    #[error("Kube error: {source}")]
    Kube {
        /// Error returned by the client.
        #[from]
        source: kube::Error,
    },
    /// Serializing an annotation payload failed.
    #[error("Serialization error: {source}")]
    Serialization {
        /// Error returned by serde_json.
        #[from]
        source: serde_json::Error,
    },
    /// Error returned by an external collaborator.
    #[error("App error: {source}")]
    App {
        /// Underlying error.
        #[from]
        source: anyhow::Error,
    },
    /// Several independent operations failed.
    #[error("{0}")]
    Multiple(Errors),
}

impl Error {
    /// Reports whether the error is a platform "not found" response.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube { source } => is_not_found(source),
            _ => false,
        }
    }

    /// Join collected errors into one. Returns `Ok` when nothing was collected.
    pub fn join(errors: Vec<Error>) -> Result<()> {
        let mut errors = errors;
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(Errors(errors))),
        }
    }
}

/// Reports whether a kube error is a "not found" API response.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.reason == "NotFound" || resp.code == 404)
}

/// A list of errors that display one per line.
#[derive(Debug)]
pub struct Errors(pub Vec<Error>);

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        write!(f, "{lines}")
    }
}
