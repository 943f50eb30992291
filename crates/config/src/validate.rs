//! Configuration validation engine.
//!
//! Validates TOML configuration against the known schema, detects
//! unknown/misspelled fields, and reports settings that would make the
//! bridge misbehave at runtime.

use std::{collections::HashMap, path::Path};

use crate::schema::CourierConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "dispatch",
    /// "agent", "metrics", "transport"
    pub category: &'static str,
    /// Dotted path, e.g. "agent.timeout_secs"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Dynamic keys whose values share a shape (`agent.env`, `metrics.labels`).
    Map(Box<KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    let policy = || {
        Struct(HashMap::from([
            ("requires_trigger", Leaf),
            (
                "echo",
                Struct(HashMap::from([("include_self", Leaf), ("include_bots", Leaf)])),
            ),
        ]))
    };

    Struct(HashMap::from([
        ("store", Struct(HashMap::from([("path", Leaf)]))),
        (
            "dispatch",
            Struct(HashMap::from([
                ("assistant_name", Leaf),
                ("trigger_pattern", Leaf),
                ("bot_senders", Leaf),
                ("default_policy", policy()),
                ("max_batch_events", Leaf),
                ("prefix_replies", Leaf),
            ])),
        ),
        (
            "agent",
            Struct(HashMap::from([
                ("command", Leaf),
                ("args", Leaf),
                ("env", Map(Box::new(Leaf))),
                ("working_dir", Leaf),
                ("timeout_secs", Leaf),
                ("max_output_bytes", Leaf),
            ])),
        ),
        (
            "media",
            Struct(HashMap::from([("dir", Leaf), ("resolve_timeout_secs", Leaf)])),
        ),
        (
            "whatsapp",
            Struct(HashMap::from([
                ("enabled", Leaf),
                ("sidecar_url", Leaf),
                ("account_id", Leaf),
                ("send_timeout_secs", Leaf),
                ("connect_attempts", Leaf),
            ])),
        ),
        (
            "metrics",
            Struct(HashMap::from([
                ("enabled", Leaf),
                ("listen", Leaf),
                ("labels", Map(Box::new(Leaf))),
            ])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b_chars.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let above = row[j + 1];
            let substitution = diagonal + usize::from(ca != cb);
            row[j + 1] = substitution.min(above + 1).min(row[j] + 1);
            diagonal = above;
        }
    }
    row[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, excluding exact matches.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "syntax",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let mut result = validate_toml_str(&crate::loader::substitute_env(&content));
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML string without file-system side effects.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&toml_value, &build_schema_map(), "", &mut diagnostics);

    match toml::from_str::<CourierConfig>(toml_str) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let toml::Value::Table(table) = value else {
        return;
    };
    match schema {
        KnownKeys::Struct(fields) => {
            let known_keys: Vec<&str> = fields.keys().copied().collect();
            for (key, child_value) in table {
                let path = join_path(prefix, key);
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child_value, child_schema, &path, diagnostics);
                    continue;
                }
                let message = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "unknown-field",
                    path,
                    message,
                });
            }
        },
        KnownKeys::Map(value_schema) => {
            for (key, child_value) in table {
                check_unknown_fields(
                    child_value,
                    value_schema,
                    &join_path(prefix, key),
                    diagnostics,
                );
            }
        },
        KnownKeys::Leaf => {},
    }
}

fn check_semantics(config: &CourierConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut push = |severity, category, path: &str, message: String| {
        diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message,
        });
    };

    let dispatch = &config.dispatch;
    if dispatch.assistant_name.trim().is_empty() {
        push(
            Severity::Error,
            "dispatch",
            "dispatch.assistant_name",
            "assistant name must not be empty".into(),
        );
    }
    if let Err(e) = regex::Regex::new(&dispatch.effective_trigger_pattern()) {
        push(
            Severity::Error,
            "dispatch",
            "dispatch.trigger_pattern",
            format!("invalid trigger pattern: {e}"),
        );
    }
    match dispatch.max_batch_events {
        Some(0) => push(
            Severity::Error,
            "dispatch",
            "dispatch.max_batch_events",
            "max_batch_events must be at least 1 (omit it for no bound)".into(),
        ),
        Some(limit) => push(
            Severity::Warning,
            "dispatch",
            "dispatch.max_batch_events",
            format!(
                "a backlog longer than {limit} events is truncated; the older events are \
                 skipped and never reach the agent"
            ),
        ),
        None => {},
    }
    if dispatch.default_policy.echo.include_self && !dispatch.prefix_replies {
        push(
            Severity::Warning,
            "dispatch",
            "dispatch.default_policy.echo.include_self",
            "own replies will be fed back to the agent; with prefix_replies off they are \
             indistinguishable from the account owner's messages"
                .into(),
        );
    }

    if config.agent.command.trim().is_empty() {
        push(
            Severity::Error,
            "agent",
            "agent.command",
            "agent command must not be empty".into(),
        );
    }
    if config.agent.timeout_secs == 0 {
        push(
            Severity::Error,
            "agent",
            "agent.timeout_secs",
            "timeout must be greater than zero".into(),
        );
    }
    if config.media.resolve_timeout_secs == 0 {
        push(
            Severity::Error,
            "agent",
            "media.resolve_timeout_secs",
            "timeout must be greater than zero".into(),
        );
    }

    if let Some(listen) = &config.metrics.listen
        && listen.parse::<std::net::SocketAddr>().is_err()
    {
        push(
            Severity::Error,
            "metrics",
            "metrics.listen",
            format!("expected a socket address like 127.0.0.1:9464, got \"{listen}\""),
        );
    }

    let wa = &config.whatsapp;
    if wa.enabled {
        if !(wa.sidecar_url.starts_with("ws://") || wa.sidecar_url.starts_with("wss://")) {
            push(
                Severity::Error,
                "transport",
                "whatsapp.sidecar_url",
                format!("expected a ws:// or wss:// URL, got \"{}\"", wa.sidecar_url),
            );
        }
        if wa.send_timeout_secs >= config.agent.timeout_secs {
            push(
                Severity::Warning,
                "transport",
                "whatsapp.send_timeout_secs",
                "send timeout is not shorter than the agent timeout; a slow send will \
                 surface as an invocation timeout"
                    .into(),
            );
        }
    } else {
        push(
            Severity::Info,
            "transport",
            "whatsapp.enabled",
            "no transport enabled; the bridge will only process stored events".into(),
        );
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(result: &'a ValidationResult, path: &str) -> Option<&'a Diagnostic> {
        result.diagnostics.iter().find(|d| d.path == path)
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("hello", "hello"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("agent", "agnt"), 1);
        assert_eq!(levenshtein("cat", "car"), 1);
        assert_eq!(levenshtein("storr", "store"), 1);
    }

    #[test]
    fn empty_config_is_valid() {
        let result = validate_toml_str("");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = validate_toml_str("[dispach]\nassistant_name = \"x\"\n");
        let d = find(&result, "dispach").expect("diagnostic for dispach");
        assert_eq!(d.category, "unknown-field");
        assert!(d.message.contains("dispatch"), "{}", d.message);
    }

    #[test]
    fn unknown_nested_key_with_suggestion() {
        let result = validate_toml_str("[agent]\ntimeout_sec = 5\n");
        let d = find(&result, "agent.timeout_sec").expect("diagnostic");
        assert!(d.message.contains("timeout_secs"));
    }

    #[test]
    fn nested_policy_keys_are_known() {
        let toml = r#"
[dispatch.default_policy]
requires_trigger = true

[dispatch.default_policy.echo]
include_bots = true
"#;
        let result = validate_toml_str(toml);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn env_and_labels_accept_any_key() {
        let toml = r#"
[agent.env]
ANTHROPIC_API_KEY = "x"

[metrics.labels]
host = "pi"
"#;
        let result = validate_toml_str(toml);
        assert_eq!(result.count(Severity::Error), 0);
    }

    #[test]
    fn syntax_error_detected() {
        let result = validate_toml_str("[agent\n");
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn type_error_detected() {
        let result = validate_toml_str("[agent]\ntimeout_secs = \"soon\"\n");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "type-error")
        );
    }

    #[test]
    fn invalid_trigger_pattern_is_error() {
        let result = validate_toml_str("[dispatch]\ntrigger_pattern = \"(unclosed\"\n");
        let d = find(&result, "dispatch.trigger_pattern").expect("diagnostic");
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn zero_timeouts_are_errors() {
        let result = validate_toml_str("[agent]\ntimeout_secs = 0\n[media]\nresolve_timeout_secs = 0\n");
        assert!(find(&result, "agent.timeout_secs").is_some());
        assert!(find(&result, "media.resolve_timeout_secs").is_some());
    }

    #[test]
    fn non_websocket_sidecar_url_is_error() {
        let result = validate_toml_str("[whatsapp]\nsidecar_url = \"http://localhost\"\n");
        let d = find(&result, "whatsapp.sidecar_url").expect("diagnostic");
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn disabled_transport_is_info() {
        let result = validate_toml_str("[whatsapp]\nenabled = false\n");
        let d = find(&result, "whatsapp.enabled").expect("diagnostic");
        assert_eq!(d.severity, Severity::Info);
        assert!(!result.has_errors());
    }

    #[test]
    fn zero_batch_bound_is_error() {
        let result = validate_toml_str("[dispatch]\nmax_batch_events = 0\n");
        assert!(find(&result, "dispatch.max_batch_events").is_some());
    }

    #[test]
    fn batch_bound_warns_about_skipped_events() {
        let result = validate_toml_str("[dispatch]\nmax_batch_events = 50\n");
        let d = find(&result, "dispatch.max_batch_events").expect("diagnostic");
        assert_eq!(d.severity, Severity::Warning);
        assert!(d.message.contains("never reach the agent"));
        assert!(!result.has_errors());
    }

    /// Every key of the default config must be known to the validator.
    #[test]
    fn schema_drift_guard() {
        fn collect_missing(
            value: &toml::Value,
            schema: &KnownKeys,
            prefix: &str,
            missing: &mut Vec<String>,
        ) {
            let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
                return;
            };
            for (key, child) in table {
                let path = join_path(prefix, key);
                match fields.get(key.as_str()) {
                    Some(child_schema) => collect_missing(child, child_schema, &path, missing),
                    None => missing.push(path),
                }
            }
        }

        let value = toml::Value::try_from(CourierConfig::default()).expect("serialize default");
        let mut missing = Vec::new();
        collect_missing(&value, &build_schema_map(), "", &mut missing);
        assert!(missing.is_empty(), "schema map is missing keys: {missing:?}");
    }
}
