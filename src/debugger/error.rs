use crate::debugger::backend::BackendError;
use crate::debugger::breakpoint::BindError;
use crate::debugger::registry::BreakpointId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("config parsing error: {0}")]
    ConfigParsing(#[from] toml::de::Error),

    // --------------------------------- breakpoint lifecycle errors -------------------------------
    #[error("breakpoint type is not supported")]
    UnsupportedLocation,
    #[error("condition style is not supported")]
    UnsupportedCondition,
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("breakpoint was deleted")]
    Deleted,
    #[error("breakpoint {0} not found")]
    UnknownBreakpoint(BreakpointId),

    // --------------------------------- backend errors --------------------------------------------
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("event listener already running")]
    ListenerAlreadyRunning,
}

impl Error {
    /// Return a hint to an interface - continue debugging after error or end the whole session.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => false,
            Error::ConfigParsing(_) => false,
            Error::UnsupportedLocation => false,
            Error::UnsupportedCondition => false,
            Error::Bind(_) => false,
            Error::Deleted => false,
            Error::UnknownBreakpoint(_) => false,
            Error::ListenerAlreadyRunning => false,

            // event stream is lost, session can't continue
            Error::Backend(_) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
