//! User-defined templates with `{{var}}` interpolation (§3, §4.4).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub title_template: String,
    pub body_template: String,
    pub variables: BTreeMap<String, String>,
}

/// Result of rendering a [`Template`]: the substituted title/body plus any
/// `{{token}}` that had no matching variable, so callers can surface that
/// the render was only partially resolved instead of silently shipping the
/// literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub title: String,
    pub body: String,
    pub unresolved: Vec<String>,
}

impl Template {
    pub fn new(name: impl Into<String>, title_template: impl Into<String>, body_template: impl Into<String>) -> Self {
        Template {
            name: name.into(),
            title_template: title_template.into(),
            body_template: body_template.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Render with `overrides` merged on top of the template's own
    /// `variables` (overrides win on conflict).
    pub fn render(&self, overrides: &BTreeMap<String, String>) -> RenderedTemplate {
        let mut vars = self.variables.clone();
        vars.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut unresolved = Vec::new();
        let title = substitute(&self.title_template, &vars, &mut unresolved);
        let body = substitute(&self.body_template, &vars, &mut unresolved);
        unresolved.sort();
        unresolved.dedup();

        RenderedTemplate { title, body, unresolved }
    }
}

/// Case-sensitive `{{name}}` substitution. Unresolved tokens are left
/// literally in the output and recorded in `unresolved`.
fn substitute(template: &str, vars: &BTreeMap<String, String>, unresolved: &mut Vec<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let token = &after_open[..end];
                match vars.get(token) {
                    Some(value) => out.push_str(value),
                    None => {
                        unresolved.push(token.to_string());
                        out.push_str("{{");
                        out.push_str(token);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated `{{`: emit literally and stop scanning.
                out.push_str("{{");
                rest = after_open;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}
