use crate::context::Context;
use crate::pattern::Pattern;
use crate::signal::{Outcome, Signal};
use std::sync::Arc;

pub(crate) type FilterFn = Arc<dyn Fn(&mut Context) -> Outcome<()> + Send + Sync>;

struct Filter {
    pattern: Option<Pattern>,
    callback: FilterFn,
}

/// An ordered chain of filters, each optionally scoped to a pattern
#[derive(Default, Clone)]
pub(crate) struct Filters {
    filters: Vec<Arc<Filter>>,
}

impl Filters {
    pub(crate) fn push(&mut self, pattern: Option<Pattern>, callback: FilterFn) {
        self.filters.push(Arc::new(Filter { pattern, callback }));
    }

    /// Runs every filter that applies to the current request path, in order.
    ///
    /// The path is re-read before each filter, so a filter that rewrites it changes which of the
    /// following filters apply. A scoped filter sees its pattern's parameters while it runs.
    /// `pass` ends the filter that raised it; a halt or a fault ends the chain.
    pub(crate) fn run(&self, ctx: &mut Context) -> Outcome<()> {
        for filter in &self.filters {
            let saved = match &filter.pattern {
                None => None,
                Some(pattern) => {
                    let Some(matched) = pattern.matches(ctx.path()) else {
                        continue;
                    };
                    let saved = ctx.params.clone();
                    pattern.overlay(matched, &mut ctx.params);
                    Some(saved)
                }
            };

            let outcome = (filter.callback)(ctx);

            if let Some(saved) = saved {
                ctx.params = saved;
            }

            match outcome {
                Ok(()) | Err(Signal::Pass) => {}
                Err(signal) => return Err(signal),
            }
        }

        Ok(())
    }
}

pub(crate) fn filter<F>(callback: F) -> FilterFn
where
    F: Fn(&mut Context) -> Outcome<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}
