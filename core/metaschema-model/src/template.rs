//! Display templates for lookup options, e.g. `"{code} - {name}"`.
//!
//! `{{` and `}}` produce literal braces.

use std::collections::HashMap;
use std::fmt;

use crate::validate::is_identifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Literal(String),
    Field(String),
}

/// A parsed display template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTemplate {
    parts: Vec<TemplatePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError(pub String);

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TemplateError {}

impl DisplayTemplate {
    pub fn parse(input: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = input.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => {
                                return Err(TemplateError(format!(
                                    "unterminated field reference '{{{name}'"
                                )));
                            }
                        }
                    }
                    if !is_identifier(&name) {
                        return Err(TemplateError(format!("invalid field name '{name}'")));
                    }
                    if !literal.is_empty() {
                        parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(TemplatePart::Field(name));
                }
                '}' => return Err(TemplateError("unmatched '}'".into())),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }
        if !parts.iter().any(|p| matches!(p, TemplatePart::Field(_))) {
            return Err(TemplateError(
                "template must reference at least one field".into(),
            ));
        }
        Ok(Self { parts })
    }

    /// Distinct field names referenced, in order of first appearance.
    pub fn fields(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for part in &self.parts {
            if let TemplatePart::Field(name) = part {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
        }
        out
    }

    /// Renders against a row; missing values render as empty strings.
    pub fn render(&self, row: &HashMap<String, String>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => out.push_str(text),
                TemplatePart::Field(name) => {
                    if let Some(value) = row.get(name) {
                        out.push_str(value);
                    }
                }
            }
        }
        out.trim().to_string()
    }

    /// Template that shows a single column verbatim.
    pub fn single(field: &str) -> Self {
        Self {
            parts: vec![TemplatePart::Field(field.to_string())],
        }
    }
}
