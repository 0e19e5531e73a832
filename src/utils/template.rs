//! String template rendering for configured command lines.

pub struct TemplateVars;

impl TemplateVars {
    pub const PROJECT_REF: &'static str = "projectRef";
    pub const SCHEMA: &'static str = "schema";
}

/// Replace every `{{key}}` placeholder with its value. Unknown placeholders
/// are left as-is.
pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}
