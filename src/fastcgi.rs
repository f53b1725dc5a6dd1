//! The FastCGI gateway.
//!
//! Only the responder role is supported, with one request per connection. Records are read off
//! the connection until the request is complete, the request is handed to the [`Application`],
//! and the response goes back as Stdout records.
//!
//! [`Application`]: crate::Application
mod connection;
mod record;
mod responder;

pub(crate) use connection::Connection;
pub(crate) use responder::handle_connection;

#[cfg(test)]
pub(crate) use connection::tests::{decode, encode};
#[cfg(test)]
pub(crate) use record::{Pairs, ProtocolStatus, Record};
