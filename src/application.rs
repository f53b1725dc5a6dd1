use crate::context::{Context, Helpers};
use crate::error::Error;
use crate::filter::{self, Filters};
use crate::logger;
use crate::method::Method;
use crate::params::{Params, CAPTURES, SPLAT};
use crate::path;
use crate::pattern::IntoPattern;
use crate::request::Request;
use crate::rescue::{self, Rescuers};
use crate::response::{Body, Reply, Response};
use crate::router::{self, Conditions, Router};
use crate::send_file;
use crate::server_handle::{self, ServerExitReason, ServerHandle};
use crate::session::SessionStore;
use crate::settings::{Environment, Settings};
use crate::signal::{Fault, Outcome, Signal};
use crate::status;
use crate::template::Render;
use std::any::Any;
use std::error::Error as StdError;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError};

const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";
const METHOD_OVERRIDE_PARAM: &str = "_method";

macro_rules! method_routes {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers a handler for `", stringify!($method), "` requests matching `pattern`")]
            pub fn $name<P, F, R>(&mut self, pattern: P, handler: F) -> Result<&mut Self, Error>
            where
                P: IntoPattern,
                F: Fn(&mut Context) -> Outcome<R> + Send + Sync + 'static,
                R: Into<Reply>,
            {
                self.on(Method::$method, pattern, handler)
            }
        )*
    };
}

/// A web application: routes, filters, error handlers and settings.
///
/// Applications are assembled with the registration methods, then either served with
/// [`Application::run`] or driven directly with [`Application::call`].
///
/// ```
/// use crooner::{halt, Application, Outcome};
///
/// let mut app = Application::new();
/// app.get("/hello/:name", |ctx| {
///     Ok(format!("Hello {}", ctx.param("name").unwrap_or("stranger")))
/// })
/// .unwrap()
/// .get("/gone", |_| -> Outcome { Err(halt(410u16)) })
/// .unwrap();
///
/// let response = app.call(crooner::Request::new("GET", "/hello/frank")).unwrap();
/// assert_eq!(response.into_body_string(), "Hello frank");
/// ```
pub struct Application {
    settings: Arc<Settings>,
    router: Router,
    before: Filters,
    after: Filters,
    rescuers: Rescuers,
    helpers: Arc<Helpers>,
    sessions: Option<Arc<dyn SessionStore>>,
    serial: Mutex<()>,
}

impl Default for Application {
    fn default() -> Self {
        Self::with_settings(Settings::from_env())
    }
}

impl Application {
    /// Creates an application with the defaults of the environment named by `CROONER_ENV`
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            router: Router::default(),
            before: Filters::default(),
            after: Filters::default(),
            rescuers: Rescuers::default(),
            helpers: Arc::default(),
            sessions: None,
            serial: Mutex::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Changes the settings
    pub fn configure<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut Settings),
    {
        configure(Arc::make_mut(&mut self.settings));
        self
    }

    /// Changes the settings, but only when running in `environment`
    pub fn configure_for<F>(&mut self, environment: Environment, configure: F) -> &mut Self
    where
        F: FnOnce(&mut Settings),
    {
        if self.settings.environment == environment {
            self.configure(configure);
        }
        self
    }

    /// Registers a handler for `method` requests whose path matches `pattern`.
    ///
    /// Routes are tried in the order they are registered. Registering a GET route also
    /// registers it for HEAD.
    pub fn on<P, F, R>(&mut self, method: Method, pattern: P, handler: F) -> Result<&mut Self, Error>
    where
        P: IntoPattern,
        F: Fn(&mut Context) -> Outcome<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.on_with(method, pattern, Conditions::new(), handler)
    }

    /// Like [`Application::on`], with extra [`Conditions`] the request must meet
    pub fn on_with<P, F, R>(
        &mut self,
        method: Method,
        pattern: P,
        conditions: Conditions,
        handler: F,
    ) -> Result<&mut Self, Error>
    where
        P: IntoPattern,
        F: Fn(&mut Context) -> Outcome<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        let pattern = pattern.into_pattern()?;
        log::debug!(method = method.as_str(), pattern = pattern.source(); "Registered route");
        self.router
            .register(method, pattern, conditions, router::handler(handler));
        Ok(self)
    }

    method_routes! {
        get => Get,
        post => Post,
        put => Put,
        delete => Delete,
        patch => Patch,
        options => Options,
        head => Head,
        link => Link,
        unlink => Unlink,
    }

    /// Registers a filter that runs before every route
    pub fn before<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Outcome<()> + Send + Sync + 'static,
    {
        self.before.push(None, filter::filter(filter));
        self
    }

    /// Registers a filter that runs before routes, for request paths matching `pattern`
    pub fn before_at<P, F>(&mut self, pattern: P, filter: F) -> Result<&mut Self, Error>
    where
        P: IntoPattern,
        F: Fn(&mut Context) -> Outcome<()> + Send + Sync + 'static,
    {
        let pattern = pattern.into_pattern()?;
        self.before.push(Some(pattern), filter::filter(filter));
        Ok(self)
    }

    /// Registers a filter that runs once the response is ready
    pub fn after<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Outcome<()> + Send + Sync + 'static,
    {
        self.after.push(None, filter::filter(filter));
        self
    }

    /// Registers an after-filter for request paths matching `pattern`
    pub fn after_at<P, F>(&mut self, pattern: P, filter: F) -> Result<&mut Self, Error>
    where
        P: IntoPattern,
        F: Fn(&mut Context) -> Outcome<()> + Send + Sync + 'static,
    {
        let pattern = pattern.into_pattern()?;
        self.after.push(Some(pattern), filter::filter(filter));
        Ok(self)
    }

    /// Registers a handler for faults whose error is exactly of type `E`
    pub fn error<E, F, R>(&mut self, handler: F) -> &mut Self
    where
        E: StdError + 'static,
        F: Fn(&mut Context) -> Outcome<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.rescuers.add_typed::<E>(router::handler(handler));
        self
    }

    /// Registers a handler for responses whose status falls in `range`
    pub fn error_status<F, R>(&mut self, range: RangeInclusive<u16>, handler: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Outcome<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.rescuers.add_status(range, router::handler(handler));
        self
    }

    /// Registers a handler for requests no route took
    pub fn not_found<F, R>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Outcome<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.error_status(status::NOT_FOUND..=status::NOT_FOUND, handler)
    }

    /// Registers the handler for faults no other error handler took
    pub fn error_fallback<F, R>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Outcome<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.rescuers.set_fallback(router::handler(handler));
        self
    }

    /// Makes `value` available to handlers through [`Context::helper`]
    pub fn helper<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        Arc::make_mut(&mut self.helpers).insert(value);
        self
    }

    /// Sets the template engine used by [`Context::render`]
    pub fn renderer(&mut self, renderer: impl Render + 'static) -> &mut Self {
        Arc::make_mut(&mut self.helpers).renderer = Some(Arc::new(renderer));
        self
    }

    /// Sets the store sessions are loaded from and committed to
    pub fn sessions(&mut self, store: impl SessionStore + 'static) -> &mut Self {
        self.sessions = Some(Arc::new(store));
        self
    }

    /// Handles one request.
    ///
    /// Only a fault raised while an error handler runs makes this fail; every other outcome,
    /// including unmatched requests, is a response.
    pub fn call(&self, request: Request) -> Result<Response, Error> {
        let _serial = self
            .settings
            .lock
            .is_enabled()
            .then(|| self.serial.lock().unwrap_or_else(PoisonError::into_inner));

        let mut ctx = Context::with_helpers(
            request,
            Arc::clone(&self.settings),
            Arc::clone(&self.helpers),
        );

        self.prepare(&mut ctx);

        if let Some(store) = &self.sessions {
            ctx.session = store.load(&ctx.request);
        }

        match self.serve_static(&mut ctx) {
            Some(signal) => self.settle(&mut ctx, Err(signal))?,
            None => {
                self.handle(&mut ctx)?;
                self.run_after(&mut ctx)?;
            }
        }

        self.finish(ctx)
    }

    /// Starts serving the application with FastCGI on the address in the settings
    pub fn start(self) -> Result<ServerHandle, Error> {
        let address = self.settings.address();
        server_handle::start(address, self)
    }

    /// Like [`Application::start`], but blocks until the server exits
    pub fn run(self) -> Result<ServerExitReason, Error> {
        Ok(self.start()?.join())
    }

    // Gathers parameters, applies the method override and normalizes the path
    fn prepare(&self, ctx: &mut Context) {
        let request = &mut ctx.request;
        let mut params = Params::parse(&request.query_string);

        if request
            .media_type()
            .is_some_and(|t| t.eq_ignore_ascii_case(FORM_MEDIA_TYPE))
        {
            params.append_encoded(&String::from_utf8_lossy(&request.body));
        }

        // Only matched patterns fill these
        params.remove(SPLAT);
        params.remove(CAPTURES);

        if self.settings.method_override && request.method.eq_ignore_ascii_case("POST") {
            if let Some(method) = params
                .get(METHOD_OVERRIDE_PARAM)
                .and_then(|m| m.parse::<Method>().ok())
            {
                request.method = method.as_str().to_string();
            }
        }

        request.path = path::normalize(&request.path);
        ctx.params = params;
    }

    fn serve_static(&self, ctx: &mut Context) -> Option<Signal> {
        let readable = matches!(ctx.request_method(), Some(Method::Get | Method::Head));
        if !self.settings.static_files || !readable {
            return None;
        }
        send_file::serve_static(ctx)
    }

    // Before-filters, then routes
    fn handle(&self, ctx: &mut Context) -> Result<(), Error> {
        let outcome = match self.before.run(ctx) {
            Ok(()) => match self.router.dispatch(ctx) {
                Some(outcome) => outcome,
                None => return self.route_missing(ctx),
            },
            Err(signal) => Err(signal),
        };

        self.settle(ctx, outcome)
    }

    fn settle(&self, ctx: &mut Context, outcome: Outcome) -> Result<(), Error> {
        match outcome {
            Ok(reply) | Err(Signal::Halt(reply)) => {
                reply.apply(&mut ctx.response);
                self.rescue_status(ctx)
            }
            Err(Signal::Pass) => self.route_missing(ctx),
            Err(Signal::Fault(fault)) => self.rescue(ctx, fault),
        }
    }

    fn route_missing(&self, ctx: &mut Context) -> Result<(), Error> {
        ctx.response.status = status::NOT_FOUND;
        ctx.response.body = Body::from(rescue::NOT_FOUND_BODY);
        if self.settings.x_cascade {
            ctx.response.insert_header("X-Cascade", "pass");
        }

        self.rescue_status(ctx)
    }

    // Status handlers also take responses that merely ended with an error status
    fn rescue_status(&self, ctx: &mut Context) -> Result<(), Error> {
        let code = ctx.response.status;
        if !status::is_error(code) {
            return Ok(());
        }

        match self.rescuers.select(None, code) {
            Some(handler) => {
                let outcome = handler(ctx);
                self.settle_rescue(ctx, outcome)
            }
            None => Ok(()),
        }
    }

    fn rescue(&self, ctx: &mut Context, fault: Fault) -> Result<(), Error> {
        let code = fault.status().unwrap_or(status::INTERNAL_SERVER_ERROR);

        if self.settings.dump_errors {
            log::error!(
                error:% = fault,
                status = code,
                method = ctx.request.method.as_str(),
                path = ctx.request.path.as_str();
                "Request failed"
            );
        }

        ctx.response.status = code;
        ctx.response.body = Body::from(rescue::default_body(code, &fault, &self.settings));
        if code == status::NOT_FOUND && self.settings.x_cascade {
            ctx.response.insert_header("X-Cascade", "pass");
        }

        let handler = self.rescuers.select(Some(&fault), code);
        ctx.fault = Some(fault);

        match handler {
            Some(handler) => {
                let outcome = handler(ctx);
                self.settle_rescue(ctx, outcome)
            }
            None => Ok(()),
        }
    }

    // Error handlers get no second chance: their faults end the request
    fn settle_rescue(&self, ctx: &mut Context, outcome: Outcome) -> Result<(), Error> {
        match outcome {
            Ok(reply) | Err(Signal::Halt(reply)) => {
                reply.apply(&mut ctx.response);
                Ok(())
            }
            Err(Signal::Pass) => Ok(()),
            Err(Signal::Fault(fault)) => Err(Error::Unrecovered(fault)),
        }
    }

    fn run_after(&self, ctx: &mut Context) -> Result<(), Error> {
        match self.after.run(ctx) {
            Ok(()) | Err(Signal::Pass) => Ok(()),
            Err(Signal::Halt(reply)) => {
                reply.apply(&mut ctx.response);
                Ok(())
            }
            Err(Signal::Fault(fault)) if ctx.fault.is_some() => Err(Error::Unrecovered(fault)),
            Err(Signal::Fault(fault)) => self.rescue(ctx, fault),
        }
    }

    fn finish(&self, mut ctx: Context) -> Result<Response, Error> {
        if let Some(store) = &self.sessions {
            store.commit(&ctx.session, &mut ctx.response);
        }

        if !ctx.response.body.is_empty() && ctx.response.header("Content-Type").is_none() {
            let value = self.settings.with_charset(&self.settings.default_content_type);
            ctx.response.insert_header("Content-Type", value);
        }

        if ctx.request_method() == Some(Method::Head) {
            ctx.response.body = Body::default();
        }

        if self.settings.logging {
            logger::access(
                ctx.response.status,
                &ctx.request.method,
                &ctx.request.path,
                ctx.created_at,
            );
        }

        Ok(ctx.into_response())
    }
}
