//! Top-level error type aggregating every component's errors.

use crate::config::ConfigError;
use crate::convert::ConvertError;
use crate::merge::MergeError;
use crate::redo::RedoError;
use crate::wdiff::WdiffError;
use crate::wlog::WlogError;

/// Any error this crate's public API can return.
#[derive(Debug)]
pub enum Error {
    Wlog(WlogError),
    Wdiff(WdiffError),
    Convert(ConvertError),
    Merge(MergeError),
    Redo(RedoError),
    Config(ConfigError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wlog(e) => write!(f, "{e}"),
            Self::Wdiff(e) => write!(f, "{e}"),
            Self::Convert(e) => write!(f, "{e}"),
            Self::Merge(e) => write!(f, "{e}"),
            Self::Redo(e) => write!(f, "{e}"),
            Self::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wlog(e) => Some(e),
            Self::Wdiff(e) => Some(e),
            Self::Convert(e) => Some(e),
            Self::Merge(e) => Some(e),
            Self::Redo(e) => Some(e),
            Self::Config(e) => Some(e),
        }
    }
}

impl From<WlogError> for Error {
    fn from(e: WlogError) -> Self {
        Self::Wlog(e)
    }
}

impl From<WdiffError> for Error {
    fn from(e: WdiffError) -> Self {
        Self::Wdiff(e)
    }
}

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Self::Convert(e)
    }
}

impl From<MergeError> for Error {
    fn from(e: MergeError) -> Self {
        Self::Merge(e)
    }
}

impl From<RedoError> for Error {
    fn from(e: RedoError) -> Self {
        Self::Redo(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
