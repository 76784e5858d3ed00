/// Message templating.
///
/// Templates reference fields of [`MessageData`] by name in braces, e.g.
/// `"Metric {metric} {verb}"`. `{{` and `}}` produce literal braces.
/// Rendering is a pure function so message wording can be tested without a
/// delivery backend.

use serde::{Deserialize, Serialize};

/// Structured values available to notification templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    /// Site name shown in email subjects.
    pub site: String,
    pub level: String,
    pub verb: String,
    /// Metric display with the first letter capitalised.
    pub metric: String,
    /// Metric display as-is.
    pub actor: String,
    /// Extra detail, e.g. "(greater than 90.0)". Empty when not applicable.
    pub info: String,
    /// Target label, empty for general metrics.
    pub target: String,
    /// What the notification is about: the target label if there is one,
    /// otherwise the metric.
    pub subject: String,
}

impl MessageData {
    /// Field names accepted inside `{...}`.
    pub const FIELDS: &'static [&'static str] =
        &["site", "level", "verb", "metric", "actor", "info", "target", "subject"];

    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "site" => &self.site,
            "level" => &self.level,
            "verb" => &self.verb,
            "metric" => &self.metric,
            "actor" => &self.actor,
            "info" => &self.info,
            "target" => &self.target,
            "subject" => &self.subject,
            _ => return None,
        };
        Some(value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("unknown field '{{{0}}}'")]
    UnknownField(String),
    #[error("unclosed '{{' at byte {0}")]
    Unclosed(usize),
    #[error("unmatched '}}' at byte {0}")]
    Unmatched(usize),
}

/// Substitutes `{field}` placeholders in `template` with values from `data`.
pub fn render(template: &str, data: &MessageData) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len() + 32);
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' => {
                if chars.next_if(|(_, n)| *n == '{').is_some() {
                    out.push('{');
                    continue;
                }
                let mut name = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(RenderError::Unclosed(pos));
                }
                let name = name.trim();
                let value = data
                    .field(name)
                    .ok_or_else(|| RenderError::UnknownField(name.to_string()))?;
                out.push_str(value);
            }
            '}' => {
                if chars.next_if(|(_, n)| *n == '}').is_some() {
                    out.push('}');
                } else {
                    return Err(RenderError::Unmatched(pos));
                }
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Checks that `template` only references known fields.
pub fn validate(template: &str) -> Result<(), RenderError> {
    render(template, &MessageData::default()).map(|_| ())
}

/// Uppercases the first character, e.g. "load" -> "Load".
pub fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> MessageData {
        MessageData {
            site: "example.com".to_string(),
            level: "warning".to_string(),
            verb: "crossed threshold limit".to_string(),
            metric: "Load".to_string(),
            actor: "load".to_string(),
            info: "(greater than 90.0)".to_string(),
            target: String::new(),
            subject: "load".to_string(),
        }
    }

    #[test]
    fn test_render_substitutes_fields() {
        let msg = render("Metric {metric} {verb} {info}", &data()).unwrap();
        assert_eq!(msg, "Metric Load crossed threshold limit (greater than 90.0)");
    }

    #[test]
    fn test_render_email_subject() {
        let subject = render("[{site}] {level} - {subject} has {verb}", &data()).unwrap();
        assert_eq!(subject, "[example.com] warning - load has crossed threshold limit");
    }

    #[test]
    fn test_render_escaped_braces() {
        assert_eq!(render("{{literal}} {level}", &data()).unwrap(), "{literal} warning");
    }

    #[test]
    fn test_render_tolerates_spaces_inside_braces() {
        assert_eq!(render("{ level }", &data()).unwrap(), "warning");
    }

    #[test]
    fn test_render_rejects_unknown_field() {
        assert_eq!(
            render("{nope}", &data()),
            Err(RenderError::UnknownField("nope".to_string()))
        );
    }

    #[test]
    fn test_render_rejects_unbalanced_braces() {
        assert_eq!(render("abc {metric", &data()), Err(RenderError::Unclosed(4)));
        assert_eq!(render("abc } def", &data()), Err(RenderError::Unmatched(4)));
    }

    #[test]
    fn test_every_listed_field_resolves() {
        for name in MessageData::FIELDS {
            assert!(data().field(name).is_some(), "field '{}' should resolve", name);
        }
        assert!(validate("{site}{level}{verb}{metric}{actor}{info}{target}{subject}").is_ok());
    }

    #[test]
    fn test_capitalize_first() {
        assert_eq!(capitalize_first("load"), "Load");
        assert_eq!(capitalize_first(""), "");
        assert_eq!(capitalize_first("load (user: tester)"), "Load (user: tester)");
    }
}
