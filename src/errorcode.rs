//! Standard error enum for invoking operations.

/// Errors returned by engine operations.
///
/// Success is expressed as the `Ok(..)` arm of a `Result`; this enum only
/// carries failure conditions. Protocol-level failures reported to the host
/// travel as an EP0 stall, not as a wire encoding of these values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Generic failure condition
    Fail,
    /// Underlying system is busy; retry
    Busy,
    /// The state requested is already set
    Already,
    /// An invalid parameter was passed
    Inval,
    /// Parameter passed was too large
    Size,
    /// Operation or command is unsupported
    NoSupport,
    /// The requested resource does not exist
    NoDevice,
    /// The container has nothing left to give out
    Empty,
}
