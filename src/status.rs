//! HTTP status code constants

macro_rules! status_codes {
    ($($name:ident  $value:literal  $reason:literal),* $(,)?) => {
        $(
            pub const $name: u16 = $value;
        )*

        /// Returns the canonical reason phrase for `code`, if it is one of the known constants.
        pub fn reason(code: u16) -> Option<&'static str> {
            match code {
                $($value => Some($reason),)*
                _ => None,
            }
        }
    }
}

status_codes! {
    OK                          200 "OK",
    CREATED                     201 "Created",
    NO_CONTENT                  204 "No Content",
    PARTIAL_CONTENT             206 "Partial Content",
    MOVED_PERMANENTLY           301 "Moved Permanently",
    FOUND                       302 "Found",
    SEE_OTHER                   303 "See Other",
    NOT_MODIFIED                304 "Not Modified",
    TEMPORARY_REDIRECT          307 "Temporary Redirect",
    PERMANENT_REDIRECT          308 "Permanent Redirect",
    BAD_REQUEST                 400 "Bad Request",
    FORBIDDEN                   403 "Forbidden",
    NOT_FOUND                   404 "Not Found",
    METHOD_NOT_ALLOWED          405 "Method Not Allowed",
    GONE                        410 "Gone",
    PRECONDITION_FAILED         412 "Precondition Failed",
    RANGE_NOT_SATISFIABLE       416 "Range Not Satisfiable",
    TEAPOT                      418 "I'm a teapot",
    INTERNAL_SERVER_ERROR       500 "Internal Server Error",
    SERVICE_UNAVAILABLE         503 "Service Unavailable",
}

/// Returns true for 4xx and 5xx codes
pub fn is_error(code: u16) -> bool {
    (400..600).contains(&code)
}
