//! Named prompt templates with `{placeholder}` substitution.
//!
//! Rendering is a single literal pass: `{name}` is replaced by the matching variable, `{{` and
//! `}}` produce literal braces, and substituted values are never rescanned. Braces that do not
//! enclose an identifier are copied through untouched.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Name of the per-chunk map template.
pub const MAP: &str = "map";
/// Name of the combine template used by the reduce step.
pub const COMBINE: &str = "combine";
/// Name of the question-answering template.
pub const QUERY: &str = "query";
/// Name of the template applied to the first chunk by the refine strategy.
pub const REFINE_INITIAL: &str = "refine_initial";
/// Name of the template applied to every later chunk by the refine strategy.
pub const REFINE: &str = "refine";

/// Every template name a [`PromptTemplates`] set holds.
pub const TEMPLATE_NAMES: [&str; 5] = [MAP, COMBINE, QUERY, REFINE_INITIAL, REFINE];

const DEFAULT_MAP: &str = "Write a concise summary of the following text:\n\n\n\"{text}\"\n\n\nCONCISE SUMMARY:";

const DEFAULT_COMBINE: &str = "The following are summaries of consecutive parts of one article. \
Merge them into a single summary of the whole article. Do not mention \"the first part\", \
\"the second part\" and so on; the reader should experience it as one complete text:\n\n\n{text}\n\n\nCOMPLETE SUMMARY:";

const DEFAULT_QUERY: &str = "Read the following content to answer the question. If you don't know \
the answer, say that you don't know; do not try to make up an answer. If you do know it, answer \
as specifically and in as much detail as you can.\n\n{context}\n\nQuestion: {question}\nAnswer:\n";

const DEFAULT_REFINE_INITIAL: &str = "Write a concise summary of the following:\n\n\n\"{text}\"\n\n\nCONCISE SUMMARY:";

const DEFAULT_REFINE: &str = "Your job is to produce a final summary.\n\
We have provided an existing summary up to a certain point: {existing_answer}\n\
We have the opportunity to refine the existing summary (only if needed) with some more context below.\n\
------------\n{text}\n------------\n\
Given the new context, refine the original summary. If the context isn't useful, return the original summary.";

const PROPOSAL_FORMAT: &str = "# Project title\n## Goals\n## Problem statement\n## State-of-the-art\n\
## Dataset\n    - size,\n    - modality,\n    - labels,\n    - sample data visualization,\n\
    - justify the dataset is statistically significant\n## Methods\n\
## Steps, timetable, and alternatives\n## Expected outcome and validation method\n## Citations (optional)\n";

/// Errors raised while resolving or rendering templates.
#[derive(Debug, Error)]
pub enum PromptError {
    /// The template references a variable the caller did not supply.
    #[error("template '{template}' references missing variable '{variable}'")]
    MissingVariable {
        /// Template being rendered.
        template: String,
        /// Placeholder without a value.
        variable: String,
    },
    /// An override named a template that does not exist.
    #[error("unknown prompt template '{0}'")]
    UnknownTemplate(String),
    /// An override file could not be read.
    #[error("failed to read prompt template {}: {source}", path.display())]
    Io {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A named template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    text: String,
}

impl PromptTemplate {
    /// Wrap `text` under `name`.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Template name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Placeholder names referenced by the template, in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for captures in PLACEHOLDER.captures_iter(&self.text) {
            if let Some(name) = captures.get(1).map(|m| m.as_str())
                && !names.contains(&name)
            {
                names.push(name);
            }
        }
        names
    }

    /// Fail unless every placeholder is one of `available`.
    pub fn check(&self, available: &[&str]) -> Result<(), PromptError> {
        match self
            .variables()
            .into_iter()
            .find(|name| !available.contains(name))
        {
            Some(variable) => Err(self.missing(variable)),
            None => Ok(()),
        }
    }

    /// Substitute `variables` into the template.
    pub fn render(&self, variables: &[(&str, &str)]) -> Result<String, PromptError> {
        let mut rendered = String::with_capacity(self.text.len());
        let mut last = 0;
        for captures in PLACEHOLDER.captures_iter(&self.text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            rendered.push_str(&self.text[last..whole.start()]);
            rendered.push_str(self.replacement(&captures, variables)?);
            last = whole.end();
        }
        rendered.push_str(&self.text[last..]);
        Ok(rendered)
    }

    fn replacement<'v>(
        &self,
        captures: &Captures<'_>,
        variables: &[(&str, &'v str)],
    ) -> Result<&'v str, PromptError> {
        let Some(name) = captures.get(1) else {
            return Ok(if captures.get(0).map(|m| m.as_str()) == Some("{{") {
                "{"
            } else {
                "}"
            });
        };
        variables
            .iter()
            .find(|(key, _)| *key == name.as_str())
            .map(|(_, value)| *value)
            .ok_or_else(|| self.missing(name.as_str()))
    }

    fn missing(&self, variable: &str) -> PromptError {
        PromptError::MissingVariable {
            template: self.name.clone(),
            variable: variable.to_string(),
        }
    }
}

/// The full template set used by summarization and question answering.
///
/// Overrides never mutate a set in place; they return a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    /// Per-chunk map template (`{text}`).
    pub map: PromptTemplate,
    /// Reduce template (`{text}`).
    pub combine: PromptTemplate,
    /// Question-answering template (`{context}`, `{question}`).
    pub query: PromptTemplate,
    /// First refine step (`{text}`).
    pub refine_initial: PromptTemplate,
    /// Later refine steps (`{existing_answer}`, `{text}`).
    pub refine: PromptTemplate,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            map: PromptTemplate::new(MAP, DEFAULT_MAP),
            combine: PromptTemplate::new(COMBINE, DEFAULT_COMBINE),
            query: PromptTemplate::new(QUERY, DEFAULT_QUERY),
            refine_initial: PromptTemplate::new(REFINE_INITIAL, DEFAULT_REFINE_INITIAL),
            refine: PromptTemplate::new(REFINE, DEFAULT_REFINE),
        }
    }
}

impl PromptTemplates {
    /// Defaults with the refine pair replaced by a structured proposal-review summary.
    pub fn proposal_review() -> Self {
        let preamble = "You are acting as a strict proposal reviewer.";
        let instructions = "(report N/A if the proposal doesn't mention it), in clear Markdown \
with the following template:";
        let initial = format!(
            "{preamble} Please read the following proposal and provide a concise summary of it \
into the following contents {instructions}\n\n{PROPOSAL_FORMAT}\nHere is the proposal:\n\"{{text}}\"\n\nCONCISE SUMMARY:"
        );
        let refine = format!(
            "{preamble} Your job is to produce a final summary of the proposal into the following \
contents {instructions}\n\n{PROPOSAL_FORMAT}\nWe have provided an existing summary up to a certain \
point: {{existing_answer}}.\nWe have the opportunity to refine the existing summary (only if \
needed) with some more context below.\n\n--------------\n{{text}}\n--------------\n\nGiven the new \
context, refine the original summary. If the context is not useful, you must copy the original \
summary (very important!).\n"
        );
        Self {
            refine_initial: PromptTemplate::new(REFINE_INITIAL, initial),
            refine: PromptTemplate::new(REFINE, refine),
            ..Self::default()
        }
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        match name {
            MAP => Some(&self.map),
            COMBINE => Some(&self.combine),
            QUERY => Some(&self.query),
            REFINE_INITIAL => Some(&self.refine_initial),
            REFINE => Some(&self.refine),
            _ => None,
        }
    }

    /// Return a copy with template `name` replaced by `text`.
    pub fn with_override(&self, name: &str, text: impl Into<String>) -> Result<Self, PromptError> {
        let mut next = self.clone();
        let slot = match name {
            MAP => &mut next.map,
            COMBINE => &mut next.combine,
            QUERY => &mut next.query,
            REFINE_INITIAL => &mut next.refine_initial,
            REFINE => &mut next.refine,
            other => return Err(PromptError::UnknownTemplate(other.to_string())),
        };
        *slot = PromptTemplate::new(name, text);
        Ok(next)
    }

    /// Apply every `(name, text)` pair in `overrides`.
    pub fn with_overrides(&self, overrides: &BTreeMap<String, String>) -> Result<Self, PromptError> {
        overrides
            .iter()
            .try_fold(self.clone(), |templates, (name, text)| {
                templates.with_override(name, text.as_str())
            })
    }

    /// Return a copy with every `<name>.txt` found in `dir` applied as an override.
    pub fn load_overrides(&self, dir: &Path) -> Result<Self, PromptError> {
        let mut templates = self.clone();
        for name in TEMPLATE_NAMES {
            let path = dir.join(format!("{name}.txt"));
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    tracing::debug!(template = name, path = %path.display(), "Loaded prompt override");
                    templates = templates.with_override(name, text)?;
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(PromptError::Io { path, source }),
            }
        }
        Ok(templates)
    }
}
