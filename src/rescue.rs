use crate::router::Handler;
use crate::settings::Settings;
use crate::signal::Fault;
use crate::status;
use std::error::Error as StdError;
use std::ops::RangeInclusive;

pub(crate) const NOT_FOUND_BODY: &str = "<h1>Not Found</h1>";

/// Registered error handlers.
///
/// A handler is picked in three tiers: one registered for the fault's exact error type, then one
/// whose status range contains the response status, then the fallback. Within a tier the first
/// registered handler wins.
#[derive(Default, Clone)]
pub(crate) struct Rescuers {
    typed: Vec<(fn(&Fault) -> bool, Handler)>,
    status: Vec<(RangeInclusive<u16>, Handler)>,
    fallback: Option<Handler>,
}

impl Rescuers {
    pub(crate) fn add_typed<E: StdError + 'static>(&mut self, handler: Handler) {
        self.typed.push((|fault: &Fault| fault.is::<E>(), handler));
    }

    pub(crate) fn add_status(&mut self, range: RangeInclusive<u16>, handler: Handler) {
        self.status.push((range, handler));
    }

    pub(crate) fn set_fallback(&mut self, handler: Handler) {
        self.fallback = Some(handler);
    }

    /// Picks the handler for a fault, or for an unmatched request when `fault` is `None`.
    ///
    /// The fallback only ever handles faults.
    pub(crate) fn select(&self, fault: Option<&Fault>, status: u16) -> Option<&Handler> {
        if let Some(fault) = fault {
            let typed = self.typed.iter().find(|(matches, _)| matches(fault));
            if let Some((_, handler)) = typed {
                return Some(handler);
            }
        }

        let ranged = self.status.iter().find(|(range, _)| range.contains(&status));
        if let Some((_, handler)) = ranged {
            return Some(handler);
        }

        fault.and(self.fallback.as_ref())
    }
}

/// The body used for a fault that no handler took care of
pub(crate) fn default_body(code: u16, fault: &Fault, settings: &Settings) -> String {
    let reason = status::reason(code).unwrap_or("Internal Server Error");

    if settings.show_exceptions {
        format!("<h1>{reason}</h1>\n<pre>{}</pre>", escape_html(&fault.to_string()))
    } else {
        format!("<h1>{reason}</h1>")
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::request::Request;
    use crate::response::Reply;
    use crate::router::handler;
    use crate::settings::Environment;
    use std::io;
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("not allowed")]
    struct Forbidden;

    fn labelled(label: &'static str) -> Handler {
        handler(move |_| Ok(label))
    }

    #[track_caller]
    fn assert_selected(rescuers: &Rescuers, fault: Option<&Fault>, status: u16, expected: &str) {
        let handler = rescuers.select(fault, status).unwrap();
        let mut ctx = Context::new(Request::default(), Arc::new(Settings::default()));
        let Ok(Reply::Body(body)) = handler(&mut ctx) else {
            panic!("handler did not return a body");
        };
        assert_eq!(body.into_bytes(), expected.as_bytes());
    }

    fn rescuers() -> Rescuers {
        let mut rescuers = Rescuers::default();
        rescuers.set_fallback(labelled("fallback"));
        rescuers.add_status(400..=499, labelled("client"));
        rescuers.add_status(404..=404, labelled("not found"));
        rescuers.add_typed::<Forbidden>(labelled("forbidden"));
        rescuers
    }

    #[test]
    fn typed_handlers_come_first() {
        let fault = Fault::new(Forbidden).with_status(403);
        assert_selected(&rescuers(), Some(&fault), 403, "forbidden");
    }

    #[test]
    fn first_matching_range_wins() {
        let fault = Fault::new("missing").with_status(404);
        assert_selected(&rescuers(), Some(&fault), 404, "client");
        assert_selected(&rescuers(), None, 404, "client");
    }

    #[test]
    fn fallback_only_handles_faults() {
        let fault = Fault::new(io::Error::other("disk"));
        assert_selected(&rescuers(), Some(&fault), 500, "fallback");

        assert!(rescuers().select(None, 500).is_none());
        assert!(Rescuers::default().select(None, 404).is_none());
    }

    #[test]
    fn default_bodies() {
        let fault = Fault::new("<oops>");

        let dev = Settings::for_environment(Environment::Development);
        assert_eq!(
            default_body(500, &fault, &dev),
            "<h1>Internal Server Error</h1>\n<pre>&lt;oops&gt;</pre>"
        );

        let prod = Settings::for_environment(Environment::Production);
        assert_eq!(default_body(500, &fault, &prod), "<h1>Internal Server Error</h1>");
        assert_eq!(default_body(403, &fault, &prod), "<h1>Forbidden</h1>");
    }
}
