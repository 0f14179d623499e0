use std::io;

#[derive(Debug)]
pub enum EigsError {
    /// Bad user-supplied parameter: region file, track column, eigenvector count.
    Config(String),
    /// Inputs that do not fit together: track vs. bins, missing weights.
    DataIntegrity(String),
    /// Malformed text record.
    Parse {
        path: String,
        line: usize,
        msg: String,
    },
    Io(io::Error),
}

impl std::fmt::Display for EigsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EigsError::Config(msg) => write!(f, "Invalid parameter: {}", msg),
            EigsError::DataIntegrity(msg) => write!(f, "Inconsistent input: {}", msg),
            EigsError::Parse { path, line, msg } => write!(f, "{}:{}: {}", path, line, msg),
            EigsError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for EigsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EigsError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EigsError {
    fn from(e: io::Error) -> Self {
        EigsError::Io(e)
    }
}

impl From<EigsError> for io::Error {
    fn from(e: EigsError) -> Self {
        match e {
            EigsError::Io(e) => e,
            EigsError::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            EigsError::DataIntegrity(_) | EigsError::Parse { .. } => {
                io::Error::new(io::ErrorKind::InvalidData, e.to_string())
            }
        }
    }
}
