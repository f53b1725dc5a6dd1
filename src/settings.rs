use camino::Utf8PathBuf;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Environment variable selecting the [`Environment`]
pub const ENV_VAR: &str = "CROONER_ENV";
/// Fallback environment variable, checked when [`ENV_VAR`] is not set
pub const FALLBACK_ENV_VAR: &str = "APP_ENV";

/// The environment an application runs in. It selects the defaults of [`Settings`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    /// Reads the environment from `CROONER_ENV`, then `APP_ENV`.
    ///
    /// Unset or unrecognized values mean [`Environment::Development`].
    pub fn from_env() -> Self {
        let primary = std::env::var(ENV_VAR).ok();
        let fallback = std::env::var(FALLBACK_ENV_VAR).ok();
        Self::from_vars(primary.as_deref(), fallback.as_deref())
    }

    fn from_vars(primary: Option<&str>, fallback: Option<&str>) -> Self {
        let Some(value) = primary.or(fallback) else {
            return Self::default();
        };

        match value.parse() {
            Ok(env) => env,
            Err(()) => {
                log::warn!(value = value; "Unknown environment, using development");
                Self::default()
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A switch that can be flipped while the application is serving requests.
///
/// While enabled, requests are processed one at a time.
#[derive(Debug, Clone, Default)]
pub struct Lock(Arc<AtomicBool>);

impl Lock {
    pub fn enable(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Application settings
///
/// Settings are assembled while the application is defined and frozen once it starts serving.
/// Each request gets a shared reference to the same snapshot. The only exception is [`Lock`],
/// which is shared by all clones of the settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    /// Interface the server binds to
    pub bind: String,
    pub port: u16,
    /// Suppresses the startup log line
    pub quiet: bool,
    /// Number of worker threads. Defaults to the number of CPUs.
    pub threads: Option<usize>,
    /// Folder static files are served from
    pub public_folder: Option<Utf8PathBuf>,
    /// Serve files from `public_folder` before running filters and routes
    pub static_files: bool,
    /// `Cache-Control` value for static files
    pub static_cache_control: Option<String>,
    /// Enables the access log and request loggers
    pub logging: bool,
    /// Show fault messages in default error pages
    pub show_exceptions: bool,
    /// Log faults that reach error handling
    pub dump_errors: bool,
    /// Add `X-Cascade: pass` to responses for unmatched requests
    pub x_cascade: bool,
    /// Honor a `_method` parameter on POST requests
    pub method_override: bool,
    /// Turn relative redirect targets into absolute URLs
    pub absolute_redirects: bool,
    pub default_content_type: String,
    pub default_encoding: String,
    pub lock: Lock,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}

impl Settings {
    /// Returns the defaults for the environment selected by the process environment variables
    pub fn from_env() -> Self {
        Self::for_environment(Environment::from_env())
    }

    /// Returns the defaults for `environment`
    pub fn for_environment(environment: Environment) -> Self {
        let development = environment == Environment::Development;
        let test = environment == Environment::Test;

        Self {
            environment,
            bind: if development { "localhost" } else { "0.0.0.0" }.to_string(),
            port: 4567,
            quiet: false,
            threads: None,
            public_folder: None,
            static_files: false,
            static_cache_control: None,
            logging: !test,
            show_exceptions: development,
            dump_errors: !test,
            x_cascade: true,
            method_override: true,
            absolute_redirects: true,
            default_content_type: "text/html".to_string(),
            default_encoding: "utf-8".to_string(),
            lock: Lock::default(),
        }
    }

    /// Serves static files from `path`
    pub fn public_folder(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.public_folder = Some(path.into());
        self.static_files = true;
        self
    }

    /// The `bind:port` address the server listens on
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_test(&self) -> bool {
        self.environment == Environment::Test
    }

    /// Appends the default charset to textual media types that don't already name one
    pub fn with_charset(&self, media_type: &str) -> String {
        let textual = media_type.starts_with("text/")
            || matches!(
                media_type,
                "application/javascript" | "application/xml" | "application/xhtml+xml"
            );

        if textual && !media_type.contains("charset") {
            format!("{media_type};charset={}", self.default_encoding)
        } else {
            media_type.to_string()
        }
    }
}
