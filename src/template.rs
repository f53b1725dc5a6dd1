//! Template rendering interface
//!
//! This crate does not ship a template engine. Applications plug one in by implementing
//! [`Render`] and registering it with [`Application::renderer`](crate::Application::renderer).
use crate::signal::BoxError;
use std::collections::BTreeMap;

/// Values made available to a template
pub type Locals = BTreeMap<String, String>;

/// Name of the local holding the rendered template when a layout is rendered
pub const CONTENT: &str = "content";

/// Name of the template used as the default layout
pub const DEFAULT_LAYOUT: &str = "layout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    /// A template the renderer knows by name
    Named(String),
    /// Raw template source
    Inline(String),
}

impl Template {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn inline(source: impl Into<String>) -> Self {
        Self::Inline(source.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Layout {
    /// Use the `layout` template if the renderer has one
    #[default]
    Default,
    None,
    Named(String),
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub locals: Locals,
    pub layout: Layout,
    /// Media type set on the response. Defaults to the application's default content type.
    pub content_type: Option<String>,
    pub encoding: Option<String>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.locals.insert(key.into(), value.into());
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }
}

/// A template engine
pub trait Render: Send + Sync {
    fn render(&self, template: &Template, locals: &Locals) -> Result<String, BoxError>;

    /// Returns true if a template called `name` exists
    fn has_template(&self, _name: &str) -> bool {
        false
    }
}

/// Renders `template`, then wraps it in the layout selected by `options`
pub(crate) fn render_with_layout(
    renderer: &dyn Render,
    template: &Template,
    options: &RenderOptions,
) -> Result<String, BoxError> {
    let content = renderer.render(template, &options.locals)?;

    let layout = match &options.layout {
        Layout::None => return Ok(content),
        Layout::Named(name) => name.as_str(),
        Layout::Default if renderer.has_template(DEFAULT_LAYOUT) => DEFAULT_LAYOUT,
        Layout::Default => return Ok(content),
    };

    let mut locals = options.locals.clone();
    locals.insert(CONTENT.to_string(), content);
    renderer.render(&Template::named(layout), &locals)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Replaces `{{key}}` with locals. Named templates are looked up in a map.
    pub struct Mustachio {
        pub templates: BTreeMap<String, String>,
    }

    impl Mustachio {
        pub fn new<const N: usize>(templates: [(&str, &str); N]) -> Self {
            Self {
                templates: templates
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl Render for Mustachio {
        fn render(&self, template: &Template, locals: &Locals) -> Result<String, BoxError> {
            let mut source = match template {
                Template::Inline(source) => source.clone(),
                Template::Named(name) => self
                    .templates
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("no template named '{name}'"))?,
            };

            for (key, value) in locals {
                source = source.replace(&format!("{{{{{key}}}}}"), value);
            }

            Ok(source)
        }

        fn has_template(&self, name: &str) -> bool {
            self.templates.contains_key(name)
        }
    }

    #[test]
    fn renders_without_a_layout() {
        let renderer = Mustachio::new([("hello", "Hello {{name}}")]);
        let options = RenderOptions::new().local("name", "frank");

        let out = render_with_layout(&renderer, &Template::named("hello"), &options).unwrap();
        assert_eq!(out, "Hello frank");
    }

    #[test]
    fn default_layout_is_used_when_present() {
        let renderer = Mustachio::new([("layout", "<main>{{content}}</main>")]);
        let options = RenderOptions::new().local("name", "frank");

        let out = render_with_layout(&renderer, &Template::inline("hi {{name}}"), &options).unwrap();
        assert_eq!(out, "<main>hi frank</main>");

        let options = options.layout(Layout::None);
        let out = render_with_layout(&renderer, &Template::inline("hi {{name}}"), &options).unwrap();
        assert_eq!(out, "hi frank");
    }

    #[test]
    fn explicit_layouts() {
        let renderer = Mustachio::new([("admin", "[{{content}}]")]);
        let options = RenderOptions::new().layout(Layout::Named("admin".into()));

        let out = render_with_layout(&renderer, &Template::inline("x"), &options).unwrap();
        assert_eq!(out, "[x]");
    }

    #[test]
    fn missing_templates_are_errors() {
        let renderer = Mustachio::new([]);
        let result = render_with_layout(&renderer, &Template::named("nope"), &RenderOptions::new());
        assert_eq!(result.unwrap_err().to_string(), "no template named 'nope'");
    }
}
