//! ICMP: error notifications about datagrams the engine could not handle
//!
//! The engine never builds notifications itself. It hands the offending
//! datagram to an [`ErrorReporter`] together with the error class; the
//! reporter owns the datagram from then on. [`IcmpReporter`] is the
//! reference reporter: it keeps a log of reports and synthesizes the
//! notification packets that should travel back to the original source.

pub mod reporter;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::datagram::Datagram;

pub use reporter::{ErrorReport, IcmpReporter};

/// ICMP message types the engine cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    Redirect = 5,
    EchoRequest = 8,
    TimeExceeded = 11,
    ParameterProblem = 12,
}

impl IcmpType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Error messages are delivered to the protocol of the embedded datagram
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            IcmpType::DestinationUnreachable
                | IcmpType::Redirect
                | IcmpType::TimeExceeded
                | IcmpType::ParameterProblem
        )
    }
}

/// Destination-unreachable sub-codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UnreachableCode {
    Network = 0,
    Host = 1,
    Protocol = 2,
    FragmentationNeeded = 4,
}

/// Error classes reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IcmpError {
    DestinationUnreachable(UnreachableCode),
    TimeExceeded,
    ParameterProblem,
}

impl IcmpError {
    pub fn icmp_type(&self) -> IcmpType {
        match self {
            IcmpError::DestinationUnreachable(_) => IcmpType::DestinationUnreachable,
            IcmpError::TimeExceeded => IcmpType::TimeExceeded,
            IcmpError::ParameterProblem => IcmpType::ParameterProblem,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            IcmpError::DestinationUnreachable(code) => *code as u8,
            IcmpError::TimeExceeded | IcmpError::ParameterProblem => 0,
        }
    }
}

impl fmt::Display for IcmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpError::DestinationUnreachable(code) => write!(f, "destination unreachable ({:?})", code),
            IcmpError::TimeExceeded => write!(f, "time exceeded"),
            IcmpError::ParameterProblem => write!(f, "parameter problem"),
        }
    }
}

/// Structured ICMP message carried inside a datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpMessage {
    pub icmp_type: IcmpType,
    pub code: u8,
    /// The datagram an error message is about
    pub original: Option<Box<Datagram>>,
}

impl IcmpMessage {
    pub fn error(error: IcmpError, original: Datagram) -> Self {
        Self {
            icmp_type: error.icmp_type(),
            code: error.code(),
            original: Some(Box::new(original)),
        }
    }

    pub fn echo_request() -> Self {
        Self {
            icmp_type: IcmpType::EchoRequest,
            code: 0,
            original: None,
        }
    }
}

/// Sink for datagrams the engine refuses to handle
///
/// Ownership of the datagram passes to the reporter.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorReporter {
    fn report(&mut self, datagram: Datagram, error: IcmpError);
}
