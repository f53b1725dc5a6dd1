//! A Sinatra-style routing and dispatch layer for writing FastCGI application servers.
//!
//! An [`Application`] holds routes, filters and error handlers. The web server in front of it
//! (Nginx, Caddy, ...) speaks FastCGI to the application, which turns each request into a
//! [`Request`], dispatches it and writes the [`Response`] back.
//!
//! ```
//! use crooner::{Application, Settings, Environment};
//!
//! let mut app = Application::with_settings(Settings::for_environment(Environment::Test));
//!
//! app.get("/hello/:name", |ctx| {
//!     Ok(format!("Hello {}", ctx.param("name").unwrap_or_default()))
//! })
//! .unwrap();
//!
//! let server = crooner::start("localhost:0", app).unwrap();
//!
//! // This would block the current thread until the server thread exits
//! // server.join();
//!
//! // Graceful shutdown
//! server.stop();
//! ```
//!
//! Applications can also be called directly with [`Application::call`], which is how most tests
//! exercise them.
//!
//! # Handlers
//!
//! A route handler receives a [`Context`] and returns an [`Outcome`]. The success value is
//! anything that converts into a [`Reply`]: a string, bytes, a status code, a `(status, body)`
//! pair, or a `(status, headers, body)` triple.
//!
//! The error side carries the control signals of the dispatcher:
//! - [`halt`] stops processing and answers with the given reply.
//! - [`pass`] gives up on the current route, and the next matching route is tried.
//! - A [`Fault`] is an error raised by the handler. It is routed to the error handlers
//!   registered with [`Application::error`], [`Application::error_status`] and
//!   [`Application::error_fallback`].
//!
//! Since any `std::error::Error` converts into a `Fault`, the `?` operator works in handlers.
//!
//! # Request lifecycle
//!
//! 1. Parameters are collected from the query string and form bodies.
//!    `POST` requests may override their method with a `_method` parameter.
//! 2. Static files are served from the public folder, if enabled.
//! 3. Before-filters run, then the first route whose pattern and conditions match.
//! 4. After-filters run.
//! 5. Unmatched requests become `404 Not Found`, and faults are rescued by error handlers.
//!
//! # Patterns
//!
//! Route patterns support named parameters (`/users/:id`), splats (`/files/*.*`), optional
//! segments (`/posts.?:format?`) and escaped characters. Arbitrary regular expressions are
//! accepted through [`Pattern::from_regex`].
//!
//! # Deviations from the FastCGI spec
//!
//! - Only the Responder role is implemented.
//! - One request is served per connection. Clients asking to keep the connection open are told
//!   multiplexing is unsupported.
//! - `FCGI_UNKNOWN_TYPE` is sent for any unknown record type, instead of just unknown management
//!   record types.

mod application;
mod context;
mod error;
mod event_loop;
mod fastcgi;
mod filter;
mod logger;
mod method;
mod params;
mod path;
mod pattern;
mod request;
mod rescue;
mod response;
mod router;
mod send_file;
mod server_handle;
mod session;
mod settings;
mod signal;
pub mod status;
mod template;

pub use application::Application;
pub use context::Context;
pub use error::{Error, PatternSyntax};
pub use logger::{RequestLogger, ACCESS_TARGET, REQUEST_TARGET};
pub use method::{Method, UnknownMethod};
pub use params::{Params, CAPTURES, SPLAT};
pub use pattern::{IntoPattern, Pattern};
pub use request::Request;
pub use response::{Body, Headers, Reply, Response, Stream};
pub use router::Conditions;
pub use send_file::{mime_type, Disposition, FileNotFound, SendFile};
pub use server_handle::{start, ServerExitReason, ServerHandle};
pub use session::{Session, SessionStore};
pub use settings::{Environment, Lock, Settings, ENV_VAR, FALLBACK_ENV_VAR};
pub use signal::{halt, pass, BoxError, Fault, Outcome, Signal};
pub use template::{Layout, Locals, Render, RenderOptions, Template, CONTENT, DEFAULT_LAYOUT};
