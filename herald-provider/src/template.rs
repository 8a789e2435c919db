//! `{{variable}}` substitution for message bodies and subject lines.

use herald_common::Variables;

/// Render `template`, replacing every `{{name}}` with its value.
///
/// Whitespace inside the braces is ignored (`{{ name }}`). Names without a
/// value render as an empty string. An opening `{{` with no closing `}}` is
/// copied through unchanged.
#[must_use]
pub fn render(template: &str, variables: &Variables) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find("}}") else {
            output.push_str(&rest[start..]);
            return output;
        };

        let name = after_open[..end].trim();
        if let Some(value) = variables.get(name) {
            output.push_str(value);
        }
        rest = &after_open[end + 2..];
    }

    output.push_str(rest);
    output
}

/// Placeholder names used by `template`, in order of first appearance.
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        let name = after_open[..end].trim().to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
        rest = &after_open[end + 2..];
    }

    names
}
