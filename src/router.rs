use crate::context::Context;
use crate::method::Method;
use crate::pattern::Pattern;
use crate::response::Reply;
use crate::send_file;
use crate::signal::{Outcome, Signal};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub(crate) type Handler = Arc<dyn Fn(&mut Context) -> Outcome + Send + Sync>;

type Condition = Arc<dyn Fn(&mut Context) -> bool + Send + Sync>;

/// Extra requirements a request must meet for a route to match.
///
/// A route whose conditions fail behaves as if its handler called [`pass`](crate::pass).
/// Conditions run after the route's parameters are bound, so they can inspect them.
#[derive(Clone, Default)]
pub struct Conditions {
    checks: Vec<Condition>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the `Host` header (without port) to equal `host`, ignoring case
    pub fn host_name(self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.custom(move |ctx| {
            ctx.request()
                .host()
                .is_some_and(|h| h.eq_ignore_ascii_case(&host))
        })
    }

    /// Requires the `Host` header (without port) to match `pattern`
    pub fn host_matches(self, pattern: Regex) -> Self {
        self.custom(move |ctx| ctx.request().host().is_some_and(|h| pattern.is_match(h)))
    }

    /// Requires the `User-Agent` header to match `pattern`
    pub fn user_agent(self, pattern: Regex) -> Self {
        self.custom(move |ctx| {
            ctx.header("User-Agent")
                .is_some_and(|agent| pattern.is_match(agent))
        })
    }

    /// Requires the client to accept one of `types` (media types or file extensions).
    ///
    /// The first acceptable type becomes the response's `Content-Type`.
    pub fn provides<const N: usize>(self, types: [&str; N]) -> Self {
        let types: Vec<String> = types
            .iter()
            .map(|kind| match send_file::mime_type(kind) {
                Some(media_type) if !kind.contains('/') => media_type.to_string(),
                _ => kind.to_string(),
            })
            .collect();

        self.custom(move |ctx| {
            let Some(media_type) = types.iter().find(|t| ctx.request().accepts(t)) else {
                return false;
            };
            let value = ctx.settings().with_charset(media_type);
            ctx.set_header("Content-Type", value);
            true
        })
    }

    /// Adds an arbitrary predicate
    pub fn custom<F>(mut self, check: F) -> Self
    where
        F: Fn(&mut Context) -> bool + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(check));
        self
    }

    fn check(&self, ctx: &mut Context) -> bool {
        self.checks.iter().all(|check| check(ctx))
    }
}

impl fmt::Debug for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditions")
            .field("checks", &self.checks.len())
            .finish()
    }
}

pub(crate) struct Route {
    pattern: Pattern,
    conditions: Conditions,
    handler: Handler,
}

/// Routes grouped by method, each group in registration order
#[derive(Default, Clone)]
pub(crate) struct Router {
    map: BTreeMap<Method, Vec<Arc<Route>>>,
}

impl Router {
    /// Registers a route. GET routes answer HEAD requests as well.
    pub(crate) fn register(
        &mut self,
        method: Method,
        pattern: Pattern,
        conditions: Conditions,
        handler: Handler,
    ) {
        let route = Arc::new(Route {
            pattern,
            conditions,
            handler,
        });

        if method == Method::Get {
            self.map
                .entry(Method::Head)
                .or_default()
                .push(Arc::clone(&route));
        }

        self.map.entry(method).or_default().push(route);
    }

    #[cfg(test)]
    fn len(&self, method: Method) -> usize {
        self.map.get(&method).map_or(0, Vec::len)
    }

    /// Runs the first route matching the request.
    ///
    /// Routes are tried in registration order. A route that passes (or whose conditions fail)
    /// has its parameters discarded, and the next one is tried.
    /// Returns `None` when no route took the request.
    pub(crate) fn dispatch(&self, ctx: &mut Context) -> Option<Outcome> {
        let method = ctx.request_method()?;
        let routes = self.map.get(&method)?;

        for route in routes {
            let Some(matched) = route.pattern.matches(ctx.path()) else {
                continue;
            };

            let saved = ctx.params.clone();
            route.pattern.overlay(matched, &mut ctx.params);

            if !route.conditions.check(ctx) {
                ctx.params = saved;
                continue;
            }

            match (route.handler)(ctx) {
                Err(Signal::Pass) => {
                    ctx.logger()
                        .debug(format_args!("Route {} passed", route.pattern));
                    ctx.params = saved;
                }
                outcome => return Some(outcome),
            }
        }

        None
    }
}

/// Wraps a handler returning anything convertible into a [`Reply`]
pub(crate) fn handler<F, R>(callback: F) -> Handler
where
    F: Fn(&mut Context) -> Outcome<R> + Send + Sync + 'static,
    R: Into<Reply>,
{
    Arc::new(move |ctx: &mut Context| callback(ctx).map(Into::into))
}
