use crate::core::error::{Result, WorkflowError};
use crate::core::{NodeValue, Variables};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A URI expression with optional `{name}` placeholders, e.g. `/data/{run}/result`
/// or `context:/property/greeting`.
///
/// Two templates address the same dataflow channel when their reduced paths
/// (placeholders replaced by `{}`) are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    expression: String,
    scheme: String,
    path: String,
    reduced_path: String,
    segments: Vec<Segment>,
    variable_names: Vec<String>,
}

impl UriTemplate {
    /// Parses a template expression.
    ///
    /// A leading `name:` is taken as the scheme when `name` starts with a letter and
    /// contains only letters, digits, `+`, `-` or `.`.
    pub fn parse(expression: &str) -> Result<Self> {
        let (scheme, path) = split_scheme(expression);

        let mut segments = Vec::new();
        let mut variable_names = Vec::new();
        let mut reduced_path = String::new();
        let mut literal = String::new();
        let mut chars = path.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        if n == '{' {
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(WorkflowError::IllegalWorkflowSpec(format!(
                            "Unbalanced braces in URI template '{}'",
                            expression
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    reduced_path.push_str("{}");
                    variable_names.push(name.clone());
                    segments.push(Segment::Variable(name));
                }
                '}' => {
                    return Err(WorkflowError::IllegalWorkflowSpec(format!(
                        "Unbalanced braces in URI template '{}'",
                        expression
                    )));
                }
                other => {
                    literal.push(other);
                    reduced_path.push(other);
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            expression: expression.to_string(),
            scheme: scheme.to_string(),
            path: path.to_string(),
            reduced_path,
            segments,
            variable_names,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The scheme, or an empty string when none was given.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The expression without its scheme.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn reduced_path(&self) -> &str {
        &self.reduced_path
    }

    pub fn variable_names(&self) -> &[String] {
        &self.variable_names
    }

    pub fn variable_count(&self) -> usize {
        self.variable_names.len()
    }

    /// Expands the template into a concrete URI.
    ///
    /// Placeholders are filled from `variables`; the values used are returned in
    /// placeholder order alongside the URI. `prefix` is inserted before the path and
    /// `suffix` appended after it.
    pub fn expand(
        &self,
        variables: &Variables,
        prefix: &str,
        suffix: &str,
    ) -> Result<(String, Vec<NodeValue>)> {
        let mut expanded = String::new();
        let mut values = Vec::with_capacity(self.variable_names.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => expanded.push_str(text),
                Segment::Variable(name) => {
                    let value = variables.get(name).ok_or_else(|| {
                        WorkflowError::IllegalWorkflowSpec(format!(
                            "No value for variable '{}' in URI template '{}'",
                            name, self.expression
                        ))
                    })?;
                    expanded.push_str(&path_segment(value));
                    values.push(value.clone());
                }
            }
        }

        let uri = if self.scheme.is_empty() {
            format!("{}{}{}", prefix, expanded, suffix)
        } else {
            format!("{}:{}{}{}", self.scheme, prefix, expanded, suffix)
        };
        Ok((uri, values))
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Renders a value as it appears inside an expanded URI. Strings are inserted
/// without quotes.
pub fn path_segment(value: &NodeValue) -> String {
    match value {
        NodeValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn split_scheme(expression: &str) -> (&str, &str) {
    if let Some((candidate, rest)) = expression.split_once(':') {
        let mut chars = candidate.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid {
            return (candidate, rest);
        }
    }
    ("", expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_path() {
        let template = UriTemplate::parse("/multiplicand").unwrap();
        assert_eq!(template.scheme(), "");
        assert_eq!(template.path(), "/multiplicand");
        assert_eq!(template.reduced_path(), "/multiplicand");
        assert_eq!(template.variable_count(), 0);
    }

    #[test]
    fn test_parse_scheme_and_variables() {
        let template = UriTemplate::parse("context:/property/{name}/x{n}").unwrap();
        assert_eq!(template.scheme(), "context");
        assert_eq!(template.path(), "/property/{name}/x{n}");
        assert_eq!(template.reduced_path(), "/property/{}/x{}");
        assert_eq!(template.variable_names(), &["name".to_string(), "n".to_string()]);
    }

    #[test]
    fn test_node_names_are_not_schemes() {
        let template = UriTemplate::parse("BufferNode-for-B-b/multiplicand").unwrap();
        assert_eq!(template.scheme(), "");
        assert_eq!(template.reduced_path(), "BufferNode-for-B-b/multiplicand");
    }

    #[test]
    fn test_unbalanced_braces_rejected() {
        assert!(UriTemplate::parse("/data/{run").is_err());
        assert!(UriTemplate::parse("/data/run}").is_err());
    }

    #[test]
    fn test_expand_with_prefix_and_suffix() {
        let template = UriTemplate::parse("/squares/{n}").unwrap();
        let mut variables = Variables::new();
        variables.insert("n".to_string(), json!(4));
        let (uri, values) = template.expand(&variables, "/run1", "").unwrap();
        assert_eq!(uri, "/run1/squares/4");
        assert_eq!(values, vec![json!(4)]);

        let plain = UriTemplate::parse("/product").unwrap();
        let (uri, values) = plain.expand(&Variables::new(), "", "/2").unwrap();
        assert_eq!(uri, "/product/2");
        assert!(values.is_empty());
    }

    #[test]
    fn test_expand_string_values_unquoted() {
        let template = UriTemplate::parse("log:/greeting/{who}").unwrap();
        let mut variables = Variables::new();
        variables.insert("who".to_string(), json!("world"));
        let (uri, _) = template.expand(&variables, "", "").unwrap();
        assert_eq!(uri, "log:/greeting/world");
    }

    #[test]
    fn test_expand_missing_variable_fails() {
        let template = UriTemplate::parse("/squares/{n}").unwrap();
        assert!(template.expand(&Variables::new(), "", "").is_err());
    }
}
