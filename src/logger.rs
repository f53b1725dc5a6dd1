use log::Level;
use std::fmt::Display;
use std::time::Instant;

/// Log target of messages written through [`RequestLogger`]
pub const REQUEST_TARGET: &str = "crooner::request";
/// Log target of the access log
pub const ACCESS_TARGET: &str = "crooner::access";

/// A logger scoped to a single request.
///
/// Every message is tagged with the method and path of the request.
/// When logging is disabled in the settings, all calls are no-ops.
#[derive(Debug, Clone, Copy)]
pub struct RequestLogger<'a> {
    enabled: bool,
    method: &'a str,
    path: &'a str,
}

impl<'a> RequestLogger<'a> {
    pub(crate) fn new(enabled: bool, method: &'a str, path: &'a str) -> Self {
        Self {
            enabled,
            method,
            path,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log(&self, level: Level, message: impl Display) {
        if !self.enabled {
            return;
        }

        log::log!(
            target: REQUEST_TARGET,
            level,
            method = self.method,
            path = self.path;
            "{message}"
        );
    }

    pub fn debug(&self, message: impl Display) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Display) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.log(Level::Error, message);
    }
}

/// Writes one access log line for a finished request
pub(crate) fn access(status: u16, method: &str, path: &str, started: Instant) {
    let elapsed = started.elapsed();

    log::info!(
        target: ACCESS_TARGET,
        status = status,
        method = method,
        path = path,
        elapsed = elapsed.as_micros() as u64;
        "{method} {path} {status}"
    );
}
