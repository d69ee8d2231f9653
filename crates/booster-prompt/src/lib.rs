//! # booster-prompt
//!
//! Renders system/user/assistant turns from named templates. A template's
//! per-role format strings may reference the placeholders `{DATE}`, `{USER}`,
//! `{PROMPT}`, `{ASSISTANT}`, and `{SYSTEM}`; rendering is pure, and the
//! `{DATE}` source is injectable so tests stay deterministic.

use std::sync::Arc;

use booster_config::PromptSpec;
use chrono::NaiveDate;

pub type Result<T> = std::result::Result<T, TemplateError>;

/// Errors raised while rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template {template}: no value for placeholder {{{placeholder}}}")]
    MissingValue {
        template: String,
        placeholder: String,
    },
    #[error("template {template}: unknown placeholder {{{placeholder}}}")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },
    #[error("template {template}: unclosed '{{' at byte {offset}")]
    UnclosedBrace { template: String, offset: usize },
}

/// Conversation role a format string belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Source of the `{DATE}` placeholder value.
///
/// The default [`SystemClock`] reads the local date; tests inject a
/// [`FixedClock`] so rendering is reproducible.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall-clock date source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Constant date source for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Values available to placeholder substitution for a single render call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Substitutions<'a> {
    pub system: Option<&'a str>,
    pub user: Option<&'a str>,
    pub assistant: Option<&'a str>,
}

/// An immutable, named prompt template bound to a clock.
pub struct PromptTemplate {
    name: String,
    locale: String,
    base_prompt: String,
    system_format: String,
    user_format: String,
    assistant_format: String,
    clock: Arc<dyn Clock>,
}

impl PromptTemplate {
    /// Build a template from its configuration entry, using the system clock.
    pub fn from_spec(name: impl Into<String>, spec: &PromptSpec) -> Self {
        Self {
            name: name.into(),
            locale: spec.locale.clone(),
            base_prompt: spec.prompt.clone(),
            system_format: spec.system.clone(),
            user_format: spec.user.clone(),
            assistant_format: spec.assistant.clone(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the `{DATE}` source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locale tag; metadata only, no formatting logic hangs off it.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Render one role's format string with the given substitutions.
    pub fn render(&self, role: Role, subs: &Substitutions<'_>) -> Result<String> {
        let format = match role {
            Role::System => &self.system_format,
            Role::User => &self.user_format,
            Role::Assistant => &self.assistant_format,
        };
        self.substitute(format, subs)
    }

    /// Assemble the full prompt for a generation request: the system line
    /// (`{SYSTEM}` is the per-request override, falling back to the base
    /// prompt), the user line, and the assistant line rendered with an empty
    /// `{ASSISTANT}` as the generation cue.
    pub fn render_request(&self, user_text: &str, system_override: Option<&str>) -> Result<String> {
        let system_text = system_override.unwrap_or(&self.base_prompt);
        let system = self.render(
            Role::System,
            &Substitutions {
                system: Some(system_text),
                ..Default::default()
            },
        )?;
        let user = self.render(
            Role::User,
            &Substitutions {
                user: Some(user_text),
                ..Default::default()
            },
        )?;
        let assistant = self.render(
            Role::Assistant,
            &Substitutions {
                assistant: Some(""),
                ..Default::default()
            },
        )?;
        Ok(format!("{system}\n{user}\n{assistant}"))
    }

    fn substitute(&self, format: &str, subs: &Substitutions<'_>) -> Result<String> {
        let mut out = String::with_capacity(format.len());
        let mut rest = format;
        let mut consumed = 0usize;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| TemplateError::UnclosedBrace {
                template: self.name.clone(),
                offset: consumed + open,
            })?;
            let placeholder = &after[..close];
            let value = self.resolve(placeholder, subs)?;
            out.push_str(&value);
            consumed += open + 1 + close + 1;
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn resolve(&self, placeholder: &str, subs: &Substitutions<'_>) -> Result<String> {
        let missing = || TemplateError::MissingValue {
            template: self.name.clone(),
            placeholder: placeholder.to_string(),
        };
        match placeholder {
            "DATE" => Ok(self.clock.today().format("%Y-%m-%d").to_string()),
            "PROMPT" => Ok(self.base_prompt.clone()),
            "SYSTEM" => subs.system.map(str::to_string).ok_or_else(missing),
            "USER" => subs.user.map(str::to_string).ok_or_else(missing),
            "ASSISTANT" => subs.assistant.map(str::to_string).ok_or_else(missing),
            other => Err(TemplateError::UnknownPlaceholder {
                template: self.name.clone(),
                placeholder: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptTemplate")
            .field("name", &self.name)
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}
