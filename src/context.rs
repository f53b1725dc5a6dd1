use crate::logger::RequestLogger;
use crate::method::Method;
use crate::params::Params;
use crate::request::Request;
use crate::response::{Body, Reply, Response};
use crate::send_file::{self, SendFile};
use crate::session::Session;
use crate::settings::Settings;
use crate::signal::{halt, Fault, Outcome, Signal};
use crate::status;
use crate::template::{self, Render, RenderOptions, Template};
use camino::Utf8Path;
use jiff::Timestamp;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Capabilities injected into every request by the application
#[derive(Default, Clone)]
pub(crate) struct Helpers {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    pub(crate) renderer: Option<Arc<dyn Render>>,
}

impl Helpers {
    pub(crate) fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    fn get<T: Any>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }
}

/// Encapsulates all information about an individual request and the response being built for it.
///
/// Handlers, filters and error handlers all receive a mutable reference to the context.
/// Reading methods (e.g. [`Context::param`]) describe the request; writing methods
/// (e.g. [`Context::set_status`]) shape the response.
pub struct Context {
    pub(crate) request: Request,
    pub(crate) params: Params,
    pub(crate) response: Response,
    pub(crate) session: Session,
    pub(crate) settings: Arc<Settings>,
    pub(crate) helpers: Arc<Helpers>,
    pub(crate) fault: Option<Fault>,
    pub(crate) created_at: Instant,
}

impl Context {
    /// Creates a context for `request`, without any helpers
    pub fn new(request: Request, settings: Arc<Settings>) -> Self {
        Self::with_helpers(request, settings, Arc::default())
    }

    pub(crate) fn with_helpers(
        request: Request,
        settings: Arc<Settings>,
        helpers: Arc<Helpers>,
    ) -> Self {
        Self {
            request,
            params: Params::new(),
            response: Response::default(),
            session: Session::new(),
            settings,
            helpers,
            fault: None,
            created_at: Instant::now(),
        }
    }

    /// Returns the request method
    pub fn method(&self) -> &str {
        self.request.method.as_str()
    }

    /// Returns the request method, if it is one routes can be registered for
    pub fn request_method(&self) -> Option<Method> {
        self.request.method.parse().ok()
    }

    /// Returns the request path
    pub fn path(&self) -> &str {
        self.request.path.as_str()
    }

    /// Rewrites the request path. Routes are matched against the new path.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.request.path = path.into();
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Returns the value of the request header `name` if it exists
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    /// Returns the request body
    pub fn body(&self) -> &[u8] {
        &self.request.body
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    /// Returns the first value of parameter `key`
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    /// Returns the splat captures of the matched route
    pub fn splat(&self) -> &[String] {
        self.params.splat()
    }

    /// Returns the capture groups of the matched route, if it is a regex route
    pub fn captures(&self) -> &[String] {
        self.params.captures()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns a helper registered with [`Application::helper`](crate::Application::helper)
    pub fn helper<T: Any>(&self) -> Option<&T> {
        self.helpers.get::<T>()
    }

    /// Returns a logger tagged with this request
    pub fn logger(&self) -> RequestLogger<'_> {
        RequestLogger::new(
            self.settings.logging,
            &self.request.method,
            &self.request.path,
        )
    }

    /// Returns the fault being handled, when called from an error handler
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Returns the status of the response built so far
    pub fn status(&self) -> u16 {
        self.response.status
    }

    /// Sets the response status
    pub fn set_status(&mut self, code: u16) {
        self.response.status = code;
    }

    /// Sets a response header
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.response.insert_header(key, value);
    }

    /// Sets the response body
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.response.body = body.into();
    }

    /// Sets the response `Content-Type`.
    ///
    /// `kind` is either a media type (`application/json`) or a file extension (`json`).
    /// Textual types get the default charset appended.
    pub fn content_type(&mut self, kind: &str) -> Outcome<()> {
        let media_type = if kind.contains('/') {
            kind
        } else {
            send_file::mime_type(kind)
                .ok_or_else(|| Fault::new(format!("Unknown media type: {kind}")))?
        };

        let value = self.settings.with_charset(media_type);
        self.response.insert_header("Content-Type", value);
        Ok(())
    }

    /// Marks the response as a download, optionally suggesting a file name.
    ///
    /// The content type is derived from the file name extension if none is set.
    pub fn attachment(&mut self, filename: Option<&str>) {
        let disposition = match filename {
            Some(name) => {
                let name = Utf8Path::new(name).file_name().unwrap_or(name);
                if self.response.header("Content-Type").is_none() {
                    if let Some(media_type) = Utf8Path::new(name)
                        .extension()
                        .and_then(send_file::mime_type)
                    {
                        let value = self.settings.with_charset(media_type);
                        self.response.insert_header("Content-Type", value);
                    }
                }
                format!("attachment; filename=\"{name}\"")
            }
            None => String::from("attachment"),
        };

        self.response.insert_header("Content-Disposition", disposition);
    }

    /// Sets the `Cache-Control` header from a list of directives
    pub fn cache_control<const N: usize>(&mut self, directives: [&str; N]) {
        self.response
            .insert_header("Cache-Control", directives.join(", "));
    }

    /// Builds a URL for `addr`.
    ///
    /// Addresses that already carry a scheme are returned as is. Others are made absolute using
    /// the request's scheme and `Host` header when `absolute_redirects` is on.
    pub fn uri(&self, addr: &str) -> String {
        if addr.contains("://") {
            return addr.to_string();
        }

        let path = if addr.starts_with('/') {
            addr.to_string()
        } else {
            format!("/{addr}")
        };

        match self.request.header("Host") {
            Some(host) if self.settings.absolute_redirects => {
                format!("{}://{host}{path}", self.request.scheme)
            }
            _ => path,
        }
    }

    /// Halts with a redirect to `to`.
    ///
    /// GET requests are answered with `302 Found`, other methods with `303 See Other` so that the
    /// client follows up with a GET.
    pub fn redirect(&mut self, to: &str) -> Signal {
        let code = if self.request_method() == Some(Method::Get) {
            status::FOUND
        } else {
            status::SEE_OTHER
        };
        self.redirect_with(code, to)
    }

    /// Halts with a redirect to `to` using the given status code
    pub fn redirect_with(&mut self, code: u16, to: &str) -> Signal {
        let location = self.uri(to);
        self.response.insert_header("Location", location);
        halt(code)
    }

    /// Halts with the given status and body
    pub fn error(&mut self, code: u16, body: impl Into<Body>) -> Signal {
        halt(Reply::Pair(code, body.into()))
    }

    /// Halts with `404 Not Found` and the given body
    pub fn not_found(&mut self, body: impl Into<Body>) -> Signal {
        self.error(status::NOT_FOUND, body)
    }

    /// Sets the `ETag` header and evaluates the conditional request headers against it.
    ///
    /// Halts with `304 Not Modified` (safe methods) or `412 Precondition Failed` (other
    /// methods) when `If-None-Match` matches, and with `412` when `If-Match` doesn't.
    pub fn etag(&mut self, value: &str) -> Outcome<()> {
        self.set_etag(format!("\"{value}\""))
    }

    /// Like [`Context::etag`], with a weak validator
    pub fn weak_etag(&mut self, value: &str) -> Outcome<()> {
        self.set_etag(format!("W/\"{value}\""))
    }

    fn set_etag(&mut self, tag: String) -> Outcome<()> {
        self.response.insert_header("ETag", tag.as_str());

        let status = self.response.status;
        if !(200..300).contains(&status) && status != status::NOT_MODIFIED {
            return Ok(());
        }

        let method = self.request_method();
        // A POST creates a new resource, so `*` can't match anything yet
        let new_resource = method == Some(Method::Post);

        if let Some(list) = self.request.header("If-None-Match") {
            if etag_matches(list, &tag, new_resource) {
                let code = if method.is_some_and(|m| m.is_safe()) {
                    status::NOT_MODIFIED
                } else {
                    status::PRECONDITION_FAILED
                };
                return Err(halt(code));
            }
        }

        if let Some(list) = self.request.header("If-Match") {
            if !etag_matches(list, &tag, new_resource) {
                return Err(halt(status::PRECONDITION_FAILED));
            }
        }

        Ok(())
    }

    /// Sets the `Last-Modified` header and evaluates `If-Modified-Since` and
    /// `If-Unmodified-Since` against it.
    ///
    /// Halts with `304 Not Modified` when the client's copy is fresh, and with
    /// `412 Precondition Failed` when the resource changed after the client's date.
    /// Unparseable dates are ignored.
    pub fn last_modified(&mut self, time: Timestamp) -> Outcome<()> {
        self.response
            .insert_header("Last-Modified", send_file::http_date(time));

        if self.request.header("If-None-Match").is_some() {
            return Ok(());
        }

        let modified = time.as_second();
        let status = self.response.status;

        if status == status::OK {
            let since = self
                .request
                .header("If-Modified-Since")
                .and_then(send_file::parse_http_date);
            if since.is_some_and(|since| since.as_second() >= modified) {
                return Err(halt(status::NOT_MODIFIED));
            }
        }

        if (200..300).contains(&status) || status == status::PRECONDITION_FAILED {
            let since = self
                .request
                .header("If-Unmodified-Since")
                .and_then(send_file::parse_http_date);
            if since.is_some_and(|since| since.as_second() < modified) {
                return Err(halt(status::PRECONDITION_FAILED));
            }
        }

        Ok(())
    }

    /// Renders `template` with the application's renderer
    pub fn render(&mut self, template: Template, options: RenderOptions) -> Outcome<String> {
        let helpers = Arc::clone(&self.helpers);
        let Some(renderer) = helpers.renderer.as_deref() else {
            return Err(Fault::new("No template renderer is registered").into());
        };

        let rendered =
            template::render_with_layout(renderer, &template, &options).map_err(Fault::new)?;

        let media_type = match &options.content_type {
            Some(media_type) => Some(media_type.clone()),
            None if self.response.header("Content-Type").is_none() => {
                Some(self.settings.default_content_type.clone())
            }
            None => None,
        };

        if let Some(media_type) = media_type {
            let value = match &options.encoding {
                Some(encoding) => format!("{media_type};charset={encoding}"),
                None => self.settings.with_charset(&media_type),
            };
            self.response.insert_header("Content-Type", value);
        }

        Ok(rendered)
    }

    /// Responds with the file at `path`, bypassing the rest of the handler.
    ///
    /// See [`SendFile`] for the available options.
    pub fn send_file(&mut self, path: impl AsRef<Utf8Path>, options: SendFile) -> Signal {
        send_file::send_file(self, path.as_ref(), &options)
    }

    pub(crate) fn into_response(self) -> Response {
        self.response
    }
}

fn etag_matches(list: &str, tag: &str, new_resource: bool) -> bool {
    if list.trim() == "*" {
        return !new_resource;
    }
    list.split(',').map(str::trim).any(|candidate| candidate == tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Environment;
    use assert_matches::assert_matches;

    fn context(request: Request) -> Context {
        Context::new(
            request,
            Arc::new(Settings::for_environment(Environment::Test)),
        )
    }

    #[test]
    fn content_type_from_extension() {
        let mut ctx = context(Request::default());
        ctx.content_type("json").unwrap();
        assert_eq!(ctx.response().header("Content-Type"), Some("application/json"));

        ctx.content_type("text/plain").unwrap();
        assert_eq!(
            ctx.response().header("Content-Type"),
            Some("text/plain;charset=utf-8")
        );

        assert_matches!(ctx.content_type("nope"), Err(Signal::Fault(_)));
    }

    #[test]
    fn attachments() {
        let mut ctx = context(Request::default());
        ctx.attachment(Some("reports/summary.csv"));

        assert_eq!(
            ctx.response().header("Content-Disposition"),
            Some("attachment; filename=\"summary.csv\"")
        );
        assert_eq!(
            ctx.response().header("Content-Type"),
            Some("text/csv;charset=utf-8")
        );
    }

    #[test]
    fn cache_control_directives() {
        let mut ctx = context(Request::default());
        ctx.cache_control(["public", "max-age=60"]);
        assert_eq!(
            ctx.response().header("Cache-Control"),
            Some("public, max-age=60")
        );
    }

    #[test]
    fn uri_building() {
        let ctx = context(Request::default());
        assert_eq!(ctx.uri("login"), "/login");

        let ctx = context(Request::default().with_header("Host", "example.com"));
        assert_eq!(ctx.uri("/login"), "http://example.com/login");
        assert_eq!(ctx.uri("https://other.org/x"), "https://other.org/x");
    }

    #[test]
    fn redirect_status_depends_on_method() {
        let mut ctx = context(Request::new("GET", "/"));
        assert_matches!(ctx.redirect("/next"), Signal::Halt(Reply::Status(302)));
        assert_eq!(ctx.response().header("Location"), Some("/next"));

        let mut ctx = context(Request::new("POST", "/"));
        assert_matches!(ctx.redirect("/next"), Signal::Halt(Reply::Status(303)));
    }

    #[test]
    fn etag_without_conditions() {
        let mut ctx = context(Request::default());
        assert_matches!(ctx.etag("abc"), Ok(()));
        assert_eq!(ctx.response().header("ETag"), Some("\"abc\""));

        assert_matches!(ctx.weak_etag("abc"), Ok(()));
        assert_eq!(ctx.response().header("ETag"), Some("W/\"abc\""));
    }

    #[test]
    fn etag_not_modified() {
        let request = Request::new("GET", "/").with_header("If-None-Match", "\"x\", \"abc\"");
        let mut ctx = context(request);
        assert_matches!(ctx.etag("abc"), Err(Signal::Halt(Reply::Status(304))));

        let request = Request::new("PUT", "/").with_header("If-None-Match", "*");
        let mut ctx = context(request);
        assert_matches!(ctx.etag("abc"), Err(Signal::Halt(Reply::Status(412))));

        let request = Request::new("POST", "/").with_header("If-None-Match", "*");
        let mut ctx = context(request);
        assert_matches!(ctx.etag("abc"), Ok(()));
    }

    #[test]
    fn etag_if_match() {
        let request = Request::new("PUT", "/").with_header("If-Match", "\"old\"");
        let mut ctx = context(request);
        assert_matches!(ctx.etag("new"), Err(Signal::Halt(Reply::Status(412))));

        let request = Request::new("PUT", "/").with_header("If-Match", "\"new\"");
        let mut ctx = context(request);
        assert_matches!(ctx.etag("new"), Ok(()));
    }

    #[test]
    fn last_modified_conditions() {
        let time: Timestamp = "2024-03-01T12:00:00Z".parse().unwrap();

        let mut ctx = context(Request::default());
        assert_matches!(ctx.last_modified(time), Ok(()));
        assert_eq!(
            ctx.response().header("Last-Modified"),
            Some("Fri, 01 Mar 2024 12:00:00 GMT")
        );

        let request = Request::default()
            .with_header("If-Modified-Since", "Fri, 01 Mar 2024 12:00:00 GMT");
        let mut ctx = context(request);
        assert_matches!(
            ctx.last_modified(time),
            Err(Signal::Halt(Reply::Status(304)))
        );

        let request = Request::default()
            .with_header("If-Modified-Since", "Thu, 29 Feb 2024 12:00:00 GMT");
        let mut ctx = context(request);
        assert_matches!(ctx.last_modified(time), Ok(()));

        let request = Request::new("PUT", "/")
            .with_header("If-Unmodified-Since", "Thu, 29 Feb 2024 12:00:00 GMT");
        let mut ctx = context(request);
        assert_matches!(
            ctx.last_modified(time),
            Err(Signal::Halt(Reply::Status(412)))
        );

        let request = Request::default().with_header("If-Modified-Since", "yesterday-ish");
        let mut ctx = context(request);
        assert_matches!(ctx.last_modified(time), Ok(()));
    }

    #[test]
    fn render_requires_a_renderer() {
        let mut ctx = context(Request::default());
        let result = ctx.render(Template::inline("hi"), RenderOptions::new());
        assert_matches!(result, Err(Signal::Fault(_)));
    }

    #[test]
    fn render_sets_content_type() {
        let mut helpers = Helpers::default();
        helpers.renderer = Some(Arc::new(crate::template::tests::Mustachio::new([])));
        let mut ctx = Context::with_helpers(
            Request::default(),
            Arc::new(Settings::default()),
            Arc::new(helpers),
        );

        let out = ctx
            .render(
                Template::inline("hi {{who}}"),
                RenderOptions::new().local("who", "you"),
            )
            .unwrap();
        assert_eq!(out, "hi you");
        assert_eq!(
            ctx.response().header("Content-Type"),
            Some("text/html;charset=utf-8")
        );

        ctx.render(
            Template::inline("{}"),
            RenderOptions::new()
                .content_type("application/json")
                .encoding("latin1"),
        )
        .unwrap();
        assert_eq!(
            ctx.response().header("Content-Type"),
            Some("application/json;charset=latin1")
        );
    }

    #[test]
    fn helpers_are_looked_up_by_type() {
        struct Greeter(&'static str);

        let mut helpers = Helpers::default();
        helpers.insert(Greeter("howdy"));
        let ctx = Context::with_helpers(
            Request::default(),
            Arc::new(Settings::default()),
            Arc::new(helpers),
        );

        assert_eq!(ctx.helper::<Greeter>().map(|g| g.0), Some("howdy"));
        assert!(ctx.helper::<String>().is_none());
    }
}
