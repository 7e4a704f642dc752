use std::fmt;

#[derive(Debug)]
pub enum QuireError {
    InvalidConfiguration(String),
    Font(String),
    Image(String),
    InvalidState(String),
    Io(std::io::Error),
}

impl fmt::Display for QuireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuireError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            QuireError::Font(message) => write!(f, "font error: {}", message),
            QuireError::Image(message) => write!(f, "image error: {}", message),
            QuireError::InvalidState(message) => write!(f, "invalid state: {}", message),
            QuireError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for QuireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QuireError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for QuireError {
    fn from(value: std::io::Error) -> Self {
        QuireError::Io(value)
    }
}
