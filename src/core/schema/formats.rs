// src/core/schema/formats.rs

//! String format checks for the schema validator.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static ENV_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .unwrap()
});

static ENV_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{[A-Za-z_][A-Za-z0-9_]*\}$").unwrap());

/// The closed set of supported `format` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    DateTime,
    Date,
    Time,
    Email,
    Ipv4,
    Uri,
    Uuid,
    Hostname,
    EnvVar,
}

impl FormatKind {
    pub fn parse(name: &str) -> Option<FormatKind> {
        match name {
            "date-time" => Some(FormatKind::DateTime),
            "date" => Some(FormatKind::Date),
            "time" => Some(FormatKind::Time),
            "email" => Some(FormatKind::Email),
            "ipv4" => Some(FormatKind::Ipv4),
            "uri" => Some(FormatKind::Uri),
            "uuid" => Some(FormatKind::Uuid),
            "hostname" => Some(FormatKind::Hostname),
            "env-var" => Some(FormatKind::EnvVar),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FormatKind::DateTime => "date-time",
            FormatKind::Date => "date",
            FormatKind::Time => "time",
            FormatKind::Email => "email",
            FormatKind::Ipv4 => "ipv4",
            FormatKind::Uri => "uri",
            FormatKind::Uuid => "uuid",
            FormatKind::Hostname => "hostname",
            FormatKind::EnvVar => "env-var",
        }
    }

    pub fn check(&self, input: &str) -> bool {
        match self {
            FormatKind::DateTime => chrono::DateTime::parse_from_rfc3339(input).is_ok(),
            FormatKind::Date => chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d").is_ok(),
            FormatKind::Time => {
                chrono::NaiveTime::parse_from_str(input, "%H:%M:%S").is_ok()
                    || chrono::NaiveTime::parse_from_str(input, "%H:%M:%S%.f").is_ok()
            }
            FormatKind::Email => EMAIL_RE.is_match(input),
            FormatKind::Ipv4 => input.parse::<std::net::Ipv4Addr>().is_ok(),
            FormatKind::Uri => is_uri(&normalize_env_refs(input)),
            FormatKind::Uuid => uuid::Uuid::parse_str(input).is_ok(),
            FormatKind::Hostname => HOSTNAME_RE.is_match(&normalize_env_refs(input)),
            FormatKind::EnvVar => ENV_VAR_RE.is_match(input),
        }
    }
}

/// Replaces `${NAME}` references with a syntactically harmless placeholder,
/// so configured-but-unresolved values like `${HOST}.example.com` still
/// satisfy the uri and hostname formats.
pub fn normalize_env_refs(input: &str) -> Cow<'_, str> {
    ENV_REF_RE.replace_all(input, "env-placeholder")
}

fn is_uri(input: &str) -> bool {
    if url::Url::parse(input).is_ok() {
        return true;
    }
    // Schemeless host-like strings pass once grounded with a scheme.
    !input.contains(char::is_whitespace) && url::Url::parse(&format!("https://{input}")).is_ok()
}
