use std::{error::Error, fmt::Display};

use crate::transport::TransportError;

/// Anything that can stop the terminal UI.
#[derive(Debug)]
pub enum GuiError {
    /// Writing to the terminal failed.
    IOError(std::io::Error),
    /// The sensor link could not be set up.
    TransportError(TransportError),
    /// No serial ports to choose from.
    NoPorts,
}

impl Display for GuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuiError::IOError(e) => write!(f, "terminal error: {}", e),
            GuiError::TransportError(e) => write!(f, "{}", e),
            GuiError::NoPorts => write!(f, "no serial ports found"),
        }
    }
}

impl Error for GuiError {}

impl From<std::io::Error> for GuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<TransportError> for GuiError {
    fn from(value: TransportError) -> Self {
        Self::TransportError(value)
    }
}
