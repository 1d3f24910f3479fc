//! Route template compilation.
//!
//! # Responsibilities
//! - Compile `/users/:id/files/*rest` into an anchored regex
//! - Validate templates (leading slash, parameter names, tail position)
//! - Bind captures to parameter names, percent-decoded
//!
//! # Design Decisions
//! - Split on `/`, escape literal segments, one capture per parameter
//! - `:name` matches exactly one non-empty segment
//! - `*name` matches the non-empty remainder and must be the last segment
//! - Templates are compiled once at registration, never on the hot path

use std::collections::HashMap;

use regex::Regex;

use crate::error::{Result, RouterError};

/// A compiled route template.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    template: String,
    regex: Regex,
    param_names: Vec<String>,
    shape: String,
}

impl RoutePattern {
    /// Compile `template`.
    pub fn compile(template: &str) -> Result<Self> {
        if !template.starts_with('/') {
            return Err(RouterError::InvalidRoute(format!(
                "path '{}' must start with '/'",
                template
            )));
        }

        let segments: Vec<&str> = template[1..].split('/').collect();
        let mut pattern = String::with_capacity(template.len() + 8);
        let mut shape = String::with_capacity(template.len());
        let mut param_names: Vec<String> = Vec::new();
        pattern.push('^');

        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            if let Some(name) = segment.strip_prefix(':') {
                check_param_name(template, name, &param_names)?;
                pattern.push_str("/([^/]+)");
                shape.push_str("/:");
                param_names.push(name.to_string());
            } else if let Some(name) = segment.strip_prefix('*') {
                if !is_last {
                    return Err(RouterError::InvalidRoute(format!(
                        "wildcard '*{}' must be the last segment of '{}'",
                        name, template
                    )));
                }
                check_param_name(template, name, &param_names)?;
                pattern.push_str("/(.+)");
                shape.push_str("/*");
                param_names.push(name.to_string());
            } else if segment.contains(['{', '}']) {
                return Err(RouterError::InvalidRoute(format!(
                    "braces are not allowed in '{}', use ':name' for parameters",
                    template
                )));
            } else {
                pattern.push('/');
                pattern.push_str(&regex::escape(segment));
                shape.push('/');
                shape.push_str(segment);
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| {
            RouterError::InvalidRoute(format!("path '{}' does not compile: {}", template, e))
        })?;

        Ok(Self {
            template: template.to_string(),
            regex,
            param_names,
            shape,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// The template with parameter names erased. Two templates with the
    /// same shape match exactly the same paths.
    pub fn shape(&self) -> &str {
        &self.shape
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match `path`, binding parameters positionally.
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let params = self
            .param_names
            .iter()
            .zip(caps.iter().skip(1))
            .map(|(name, value)| {
                let raw = value.map(|m| m.as_str()).unwrap_or_default();
                (name.clone(), decode(raw))
            })
            .collect();
        Some(params)
    }

    /// The template in axum syntax: `:id` becomes `{id}`, `*rest` becomes `{*rest}`.
    pub fn axum_path(&self) -> String {
        self.template
            .split('/')
            .map(|segment| {
                if let Some(name) = segment.strip_prefix(':') {
                    format!("{{{}}}", name)
                } else if let Some(name) = segment.strip_prefix('*') {
                    format!("{{*{}}}", name)
                } else {
                    segment.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn check_param_name(template: &str, name: &str, seen: &[String]) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(RouterError::InvalidRoute(format!(
            "invalid parameter name '{}' in '{}'",
            name, template
        )));
    }
    if seen.iter().any(|n| n == name) {
        return Err(RouterError::InvalidRoute(format!(
            "duplicate parameter '{}' in '{}'",
            name, template
        )));
    }
    Ok(())
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
