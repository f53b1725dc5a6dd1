//! Control flow out of handlers and filters
//!
//! Handlers return [`Outcome`], a `Result` whose error side is a [`Signal`].
//! A signal is how a handler tells the dispatcher to do something other than use its return
//! value:
//!
//! - [`Signal::Halt`] stops the handler and uses the attached [`Reply`] as the final response.
//! - [`Signal::Pass`] gives up on the current route; the next matching route gets a chance.
//! - [`Signal::Fault`] reports a failure that is routed to the registered error handlers.
//!
//! Because any `std::error::Error` converts into a fault, the `?` operator works as expected
//! inside handlers.
use crate::response::Reply;
use std::error::Error as StdError;
use std::fmt;

/// Boxed error type carried by faults
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The return type of handlers, filters and error handlers
pub type Outcome<T = Reply> = Result<T, Signal>;

#[derive(Debug)]
pub enum Signal {
    Halt(Reply),
    Pass,
    Fault(Fault),
}

/// Stops processing and responds with `reply`
///
/// ```
/// use crooner::{halt, Outcome};
///
/// fn gone() -> Outcome {
///     Err(halt(410u16))
/// }
/// ```
pub fn halt(reply: impl Into<Reply>) -> Signal {
    Signal::Halt(reply.into())
}

/// Skips to the next route matching the request
pub fn pass() -> Signal {
    Signal::Pass
}

/// An error raised while handling a request
///
/// A fault optionally carries the status code it maps to. Faults without one are reported as
/// `500 Internal Server Error`.
pub struct Fault {
    error: BoxError,
    status: Option<u16>,
}

impl Fault {
    pub fn new(error: impl Into<BoxError>) -> Self {
        Self {
            error: error.into(),
            status: None,
        }
    }

    /// Attaches a status code to the fault
    pub fn with_status(mut self, code: u16) -> Self {
        self.status = Some(code);
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns true if the underlying error is of type `E`
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.error.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.error.as_ref()
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("error", &self.error)
            .field("status", &self.status)
            .finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl From<Fault> for Signal {
    fn from(value: Fault) -> Self {
        Signal::Fault(value)
    }
}

impl<E> From<E> for Signal
where
    E: StdError + Send + Sync + 'static,
{
    fn from(value: E) -> Self {
        Signal::Fault(Fault::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io;

    fn read_config() -> Outcome<()> {
        let read: Result<String, io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "config missing"));
        read?;
        Ok(())
    }

    #[test]
    fn question_mark_raises_faults() {
        let signal = read_config().unwrap_err();
        assert_matches!(signal, Signal::Fault(fault) => {
            assert!(fault.is::<io::Error>());
            assert_eq!(fault.status(), None);
            assert_eq!(fault.to_string(), "config missing");
        });
    }

    #[test]
    fn faults_can_carry_a_status() {
        let fault = Fault::new("nope").with_status(403);
        assert_eq!(fault.status(), Some(403));
        assert!(!fault.is::<io::Error>());
    }

    #[test]
    fn downcasting() {
        let fault = Fault::new(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        let inner = fault.downcast_ref::<io::Error>().unwrap();
        assert_eq!(inner.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn halt_and_pass() {
        assert_matches!(halt(410u16), Signal::Halt(Reply::Status(410)));
        assert_matches!(halt("bye"), Signal::Halt(Reply::Body(_)));
        assert_matches!(pass(), Signal::Pass);
    }
}
