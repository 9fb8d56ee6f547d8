//! Placeholder substitution for scenario files.
//!
//! Supported placeholders are `{port:NAME}`, `{dir:NAME}` and `{env:NAME}`.
//! `{{` and `}}` stand for literal braces.

use crate::error::{HarnessError, Result};
use crate::workspace::RunDirs;
use std::collections::BTreeMap;

/// Values available to templates of one run.
pub struct TemplateContext<'a> {
    ports: &'a BTreeMap<String, u16>,
    dirs: &'a RunDirs,
}

impl<'a> TemplateContext<'a> {
    /// Builds a context over a run's named ports and directories.
    pub fn new(ports: &'a BTreeMap<String, u16>, dirs: &'a RunDirs) -> Self {
        Self { ports, dirs }
    }

    /// Expands every placeholder in `template`.
    pub fn render(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    out.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let rest = &template[i + 1..];
                    let end = rest
                        .find('}')
                        .ok_or_else(|| self.error(template, "unclosed '{'"))?;
                    let key = &rest[..end];
                    out.push_str(&self.lookup(template, key)?);
                    // Skip the placeholder body and its closing brace.
                    for _ in 0..=key.chars().count() {
                        chars.next();
                    }
                }
                '}' => return Err(self.error(template, "unmatched '}'")),
                c => out.push(c),
            }
        }
        Ok(out)
    }

    /// Expands every string in `items`.
    pub fn render_all(&self, items: &[String]) -> Result<Vec<String>> {
        items.iter().map(|s| self.render(s)).collect()
    }

    fn lookup(&self, template: &str, key: &str) -> Result<String> {
        let (kind, name) = key
            .split_once(':')
            .ok_or_else(|| self.error(template, &format!("placeholder {{{}}} has no kind", key)))?;
        match kind {
            "port" => self
                .ports
                .get(name)
                .map(u16::to_string)
                .ok_or_else(|| self.error(template, &format!("no port reserved as '{}'", name))),
            "dir" => self
                .dirs
                .get(name)
                .map(|p| p.display().to_string())
                .ok_or_else(|| self.error(template, &format!("unknown directory '{}'", name))),
            "env" => std::env::var(name)
                .map_err(|_| self.error(template, &format!("environment variable {} not set", name))),
            other => Err(self.error(template, &format!("unknown placeholder kind '{}'", other))),
        }
    }

    fn error(&self, template: &str, reason: &str) -> HarnessError {
        HarnessError::Template {
            template: template.to_string(),
            reason: reason.to_string(),
        }
    }
}
