use crate::status;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

pub type Headers = BTreeMap<String, String>;

/// A response body
///
/// Bodies are either fully buffered, or a stream of chunks produced lazily while the response
/// is written out.
pub enum Body {
    Bytes(Vec<u8>),
    Stream(Stream),
}

/// A lazily produced sequence of body chunks
pub struct Stream(Box<dyn Iterator<Item = Vec<u8>> + Send>);

impl Stream {
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
        I::IntoIter: Send + 'static,
    {
        Self(Box::new(chunks.into_iter()))
    }
}

impl Iterator for Stream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        self.0.next()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Stream(..)")
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Bytes(bytes) => write!(f, "Bytes({:?})", String::from_utf8_lossy(bytes)),
            Body::Stream(stream) => stream.fmt(f),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Bytes(Vec::new())
    }
}

impl Body {
    /// Returns true if the body is buffered and has no content
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Bytes(bytes) if bytes.is_empty())
    }

    /// Returns the length of a buffered body. Streams have no known length.
    pub fn len(&self) -> Option<usize> {
        match self {
            Body::Bytes(bytes) => Some(bytes.len()),
            Body::Stream(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Bytes(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }

    /// Buffers the whole body, draining streams
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Body::Bytes(bytes) => bytes,
            Body::Stream(stream) => stream.flatten().collect(),
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Bytes(value.as_bytes().to_vec())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Bytes(value.into_bytes())
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(value)
    }
}

impl From<&[u8]> for Body {
    fn from(value: &[u8]) -> Self {
        Body::Bytes(value.to_vec())
    }
}

impl From<Stream> for Body {
    fn from(value: Stream) -> Self {
        Body::Stream(value)
    }
}

/// The response being built for a request
#[derive(Debug)]
pub struct Response {
    pub(crate) status: u16,
    pub(crate) headers: Headers,
    pub(crate) body: Body,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            // The CGI RFC says this is the default if no status is provided
            status: status::OK,
            headers: Headers::new(),
            body: Body::default(),
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response header `key` to `value`
    ///
    /// If `key` was already present in the map, the value is updated
    pub fn set_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_header(key, value);
        self
    }

    /// Sets the status code of the response to `code`
    pub fn set_status(mut self, code: u16) -> Self {
        self.status = code;
        self
    }

    /// Sets the response body
    pub fn set_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the value of header `key`, compared case-insensitively
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns the body as a string, draining it if it is a stream
    pub fn into_body_string(self) -> String {
        String::from_utf8_lossy(&self.body.into_bytes()).into_owned()
    }

    /// Sets header `key`, replacing any header with the same name regardless of case
    pub fn insert_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&key));
        self.headers.insert(key, value.into());
    }

    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        let existing = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .cloned()?;
        self.headers.remove(&existing)
    }

    // CGI response head: one line per header, then the status, then a blank line.
    pub(crate) fn write_head<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        for (key, value) in self.headers.iter() {
            writeln!(writer, "{key}: {value}")?;
        }
        match status::reason(self.status) {
            Some(reason) => writeln!(writer, "Status: {} {reason}", self.status)?,
            None => writeln!(writer, "Status: {}", self.status)?,
        }
        writeln!(writer)
    }
}

/// What a handler hands back to the dispatcher
///
/// The variants are listed by precedence: a triple sets everything, a pair sets the status and
/// the body, a body (buffered or streamed) keeps the current status, and a bare status keeps the
/// current body. `Empty` leaves the response as the handler shaped it through the context.
#[derive(Debug, Default)]
pub enum Reply {
    Triple(u16, Headers, Body),
    Pair(u16, Body),
    Body(Body),
    Status(u16),
    #[default]
    Empty,
}

impl Reply {
    pub(crate) fn apply(self, response: &mut Response) {
        match self {
            Reply::Triple(status, headers, body) => {
                response.status = status;
                for (key, value) in headers {
                    response.insert_header(key, value);
                }
                response.body = body;
            }
            Reply::Pair(status, body) => {
                response.status = status;
                response.body = body;
            }
            Reply::Body(body) => response.body = body,
            Reply::Status(status) => response.status = status,
            Reply::Empty => {}
        }
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

impl From<u16> for Reply {
    fn from(value: u16) -> Self {
        Reply::Status(value)
    }
}

impl From<Response> for Reply {
    fn from(value: Response) -> Self {
        Reply::Triple(value.status, value.headers, value.body)
    }
}

macro_rules! body_replies {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Reply {
                fn from(value: $t) -> Self {
                    Reply::Body(value.into())
                }
            }

            impl From<(u16, $t)> for Reply {
                fn from((status, body): (u16, $t)) -> Self {
                    Reply::Pair(status, body.into())
                }
            }

            impl From<(u16, Headers, $t)> for Reply {
                fn from((status, headers, body): (u16, Headers, $t)) -> Self {
                    Reply::Triple(status, headers, body.into())
                }
            }
        )*
    }
}

body_replies! {
    &str,
    String,
    Vec<u8>,
    Body,
    Stream,
}
