//! Config files rendered from templates against the process environment
//! before the listener starts.
//!
//! Only environment lookups are understood: `{{ .Env.NAME }}` and
//! `{{ index .Env "NAME" }}`. Unset variables render as the empty string.

use crate::env::{expand, Environment};
use crate::error::{ConfigParseError, TemplateRenderError};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTemplate {
    pub template: PathBuf,
    pub output: PathBuf,
}

impl ConfigTemplate {
    /// Parses a `<template>=<output>` declaration.
    pub fn parse(declaration: &str, env: &dyn Environment) -> Result<Self, ConfigParseError> {
        let (template, output) = declaration
            .split_once('=')
            .map(|(t, o)| (expand(t.trim(), env), expand(o.trim(), env)))
            .filter(|(t, o)| !t.is_empty() && !o.is_empty())
            .ok_or_else(|| ConfigParseError::InvalidConfigDefinition(declaration.to_string()))?;

        Ok(Self {
            template: PathBuf::from(template),
            output: PathBuf::from(output),
        })
    }

    pub fn materialize(&self, env: &dyn Environment) -> Result<(), TemplateRenderError> {
        let source =
            std::fs::read_to_string(&self.template).map_err(|source| TemplateRenderError::Read {
                path: self.template.clone(),
                source,
            })?;

        let rendered = render(&source, env)?;
        write_output(&self.output, &rendered)?;

        info!(
            "Rendered {} to {}",
            self.template.display(),
            self.output.display()
        );
        Ok(())
    }
}

fn write_output(path: &Path, contents: &str) -> Result<(), TemplateRenderError> {
    std::fs::write(path, contents).map_err(|source| TemplateRenderError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub fn render(source: &str, env: &dyn Environment) -> Result<String, TemplateRenderError> {
    let mut out = String::with_capacity(source.len());
    let mut offset = 0;

    while let Some(start) = source[offset..].find("{{") {
        let open = offset + start;
        out.push_str(&source[offset..open]);

        let body_start = open + 2;
        let close = source[body_start..]
            .find("}}")
            .map(|end| body_start + end)
            .ok_or(TemplateRenderError::Unterminated(open))?;

        let name = env_lookup(&source[body_start..close])?;
        out.push_str(&env.var(name).unwrap_or_default());

        offset = close + 2;
    }

    out.push_str(&source[offset..]);
    Ok(out)
}

/// The variable name an action refers to.
fn env_lookup(action: &str) -> Result<&str, TemplateRenderError> {
    let unsupported = || TemplateRenderError::UnsupportedAction(action.trim().to_string());
    let action = action.trim();

    if let Some(name) = action.strip_prefix(".Env.") {
        return is_identifier(name).then_some(name).ok_or_else(unsupported);
    }

    let mut words = action.split_whitespace();
    match (words.next(), words.next(), words.next(), words.next()) {
        (Some("index"), Some(".Env"), Some(quoted), None) => quoted
            .strip_prefix('"')
            .and_then(|q| q.strip_suffix('"'))
            .filter(|name| !name.is_empty())
            .ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
