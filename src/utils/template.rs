//! `{{key}}` template rendering for step commands.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

// Dotted identifiers only, so Go-style `{{.ID}}` in docker/kubectl format
// strings pass through untouched.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\}\}").unwrap()
});

pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

pub fn render_map(template: &str, variables: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Placeholder names in `template` that `variables` cannot fill.
pub fn unresolved(template: &str, variables: &HashMap<String, String>) -> Vec<String> {
    let mut names: Vec<String> = PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .filter(|name| !variables.contains_key(name))
        .collect();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_listed_keys() {
        let out = render("kubectl apply -f {{manifest}}", &[("manifest", "a.yaml")]);
        assert_eq!(out, "kubectl apply -f a.yaml");
    }

    #[test]
    fn render_map_resolves_dotted_keys() {
        let mut vars = HashMap::new();
        vars.insert("needs.build.image_tag".to_string(), "v9".to_string());
        vars.insert("cluster".to_string(), "qa-dominion-cluster".to_string());
        let out = render_map("deploy {{needs.build.image_tag}} to {{cluster}}", &vars);
        assert_eq!(out, "deploy v9 to qa-dominion-cluster");
    }

    #[test]
    fn render_map_does_not_rescan_substituted_values() {
        let mut vars = HashMap::new();
        vars.insert("a".to_string(), "{{b}}".to_string());
        vars.insert("b".to_string(), "nope".to_string());
        assert_eq!(render_map("{{a}}", &vars), "{{b}}");
    }

    #[test]
    fn unresolved_reports_unknown_names() {
        let mut vars = HashMap::new();
        vars.insert("cluster".to_string(), "dev-dominion-cluster".to_string());
        let names = unresolved("push {{needs.build.image}} to {{cluster}} and {{typo}}", &vars);
        assert_eq!(names, vec!["needs.build.image", "typo"]);
    }

    #[test]
    fn unresolved_ignores_placeholders_inside_values() {
        let mut vars = HashMap::new();
        vars.insert("image_tag".to_string(), "{{x}}".to_string());
        assert!(unresolved("echo {{image_tag}}", &vars).is_empty());
    }

    #[test]
    fn go_templates_are_not_placeholders() {
        let vars = HashMap::new();
        assert!(unresolved("docker ps --format '{{.ID}}' {{ .Names }}", &vars).is_empty());
    }
}
