//! Local rendering of `gitlab.rb` templates.
//!
//! Variables come from a YAML file and are handed to minijinja untouched, so
//! nested maps and lists work as they would in any Jinja template. The
//! environment loads templates from the template's own directory, which lets
//! a template `{% include %}` its siblings. Undefined variables are errors.
//!
//! Rendered output starts with a four-line provenance header and always ends
//! with exactly one newline.

use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior, Value};
use serde_yaml::Mapping;

use crate::error::RenderError;
use crate::types::RunStamp;

/// A rendered file, ready to upload or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    /// Header plus rendered body.
    pub text: String,
    /// Basename of the template.
    pub template_name: String,
    /// Basename of the variables file, if one was used.
    pub vars_name: Option<String>,
}

/// Load template variables.
///
/// `None` and an empty (or `null`) document both give an empty mapping. A
/// path that does not exist, invalid YAML and a non-mapping top level are
/// reported as separate errors.
pub fn load_variables(path: Option<&Path>) -> Result<Mapping, RenderError> {
    let Some(path) = path else {
        return Ok(Mapping::new());
    };

    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RenderError::VariablesNotFound(path.to_path_buf()),
        _ => RenderError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| RenderError::VariablesParse {
            path: path.to_path_buf(),
            source: e,
        })?;

    match value {
        serde_yaml::Value::Null => Ok(Mapping::new()),
        serde_yaml::Value::Mapping(map) => Ok(map),
        _ => Err(RenderError::VariablesNotMapping(path.to_path_buf())),
    }
}

/// Render `template` with the variables from `vars`.
pub fn render(
    template: &Path,
    vars: Option<&Path>,
    stamp: &RunStamp,
) -> Result<RenderedDocument, RenderError> {
    if !template.is_file() {
        return Err(RenderError::TemplateNotFound(template.to_path_buf()));
    }
    let variables = load_variables(vars)?;

    let template_name = file_name(template);
    let dir = template
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_loader(minijinja::path_loader(dir));

    let engine_error = |source: minijinja::Error| RenderError::Template {
        name: template_name.clone(),
        source,
    };
    let body = env
        .get_template(&template_name)
        .and_then(|tmpl| tmpl.render(Value::from_serialize(&variables)))
        .map_err(engine_error)?;

    let vars_name = vars.map(file_name);
    let mut text = header(stamp, &template_name, vars_name.as_deref());
    let body = body.trim_end_matches(['\n', '\r']);
    if !body.is_empty() {
        text.push_str(body);
        text.push('\n');
    }

    Ok(RenderedDocument {
        text,
        template_name,
        vars_name,
    })
}

/// The generated-file header, one comment per line.
pub fn header(stamp: &RunStamp, template_name: &str, vars_name: Option<&str>) -> String {
    format!(
        "# Generated by {} - local edits will be overwritten\n\
         # Generated at: {}\n\
         # Template: {}\n\
         # Variables: {}\n",
        env!("CARGO_PKG_NAME"),
        stamp.iso(),
        template_name,
        vars_name.unwrap_or("(none)"),
    )
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test::fixed_stamp;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn body(doc: &RenderedDocument) -> String {
        doc.text.lines().skip(4).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn renders_with_variables() {
        let dir = TempDir::new().unwrap();
        let tmpl = write(&dir, "gitlab.rb.j2", "external_url '{{ external_url }}'\n");
        let vars = write(&dir, "prod.yml", "external_url: https://gitlab.example.com\n");

        let doc = render(&tmpl, Some(&vars), &fixed_stamp()).unwrap();
        assert_eq!(body(&doc), "external_url 'https://gitlab.example.com'");
        assert_eq!(doc.template_name, "gitlab.rb.j2");
        assert_eq!(doc.vars_name.as_deref(), Some("prod.yml"));
    }

    #[test]
    fn header_has_four_comment_lines() {
        let dir = TempDir::new().unwrap();
        let tmpl = write(&dir, "gitlab.rb.j2", "x = 1");
        let vars = write(&dir, "vars.yml", "");

        let doc = render(&tmpl, Some(&vars), &fixed_stamp()).unwrap();
        let lines: Vec<&str> = doc.text.lines().collect();
        assert!(lines[..4].iter().all(|l| l.starts_with("# ")));
        assert!(lines[0].contains("gitlab-upgrade-helper"));
        assert!(lines[1].contains("2024-05-17T09:30:00"));
        assert_eq!(lines[2], "# Template: gitlab.rb.j2");
        assert_eq!(lines[3], "# Variables: vars.yml");
        assert_eq!(lines[4], "x = 1");
    }

    #[test]
    fn nested_values_pass_through() {
        let dir = TempDir::new().unwrap();
        let tmpl = write(
            &dir,
            "gitlab.rb.j2",
            "{% for t in smtp.hosts %}# host {{ t }}\n{% endfor %}gitlab_rails['smtp_port'] = {{ smtp.port }}\n",
        );
        let vars = write(&dir, "vars.yml", "smtp:\n  port: 587\n  hosts: [a, b]\n");

        let doc = render(&tmpl, Some(&vars), &fixed_stamp()).unwrap();
        assert_eq!(body(&doc), "# host a\n# host b\ngitlab_rails['smtp_port'] = 587");
    }

    #[test]
    fn includes_resolve_from_template_directory() {
        let dir = TempDir::new().unwrap();
        write(&dir, "_smtp.rb.j2", "gitlab_rails['smtp_enable'] = {{ smtp }}");
        let tmpl = write(
            &dir,
            "gitlab.rb.j2",
            "external_url '{{ url }}'\n{% include '_smtp.rb.j2' %}\n",
        );
        let vars = write(&dir, "vars.yml", "url: http://x\nsmtp: true\n");

        let doc = render(&tmpl, Some(&vars), &fixed_stamp()).unwrap();
        assert_eq!(
            body(&doc),
            "external_url 'http://x'\ngitlab_rails['smtp_enable'] = true"
        );
    }

    #[test]
    fn trailing_newlines_collapse_to_one() {
        let dir = TempDir::new().unwrap();
        for input in ["a = 1", "a = 1\n", "a = 1\n\n\n"] {
            let tmpl = write(&dir, "t.j2", input);
            let doc = render(&tmpl, None, &fixed_stamp()).unwrap();
            assert!(doc.text.ends_with("a = 1\n"), "input {input:?}");
            assert!(!doc.text.ends_with("\n\n"), "input {input:?}");
        }
    }

    #[test]
    fn empty_body_ends_after_header() {
        let dir = TempDir::new().unwrap();
        for input in ["", "\n", "{# nothing to say #}\n", "{% if false %}x{% endif %}\n\n"] {
            let tmpl = write(&dir, "t.j2", input);
            let doc = render(&tmpl, None, &fixed_stamp()).unwrap();
            assert!(doc.text.ends_with("# Variables: (none)\n"), "input {input:?}");
            assert!(!doc.text.ends_with("\n\n"), "input {input:?}");
            assert_eq!(doc.text.lines().count(), 4, "input {input:?}");
        }
    }

    #[test]
    fn absent_variables_render_as_empty() {
        let dir = TempDir::new().unwrap();
        let tmpl = write(&dir, "t.j2", "static = true\n");

        let doc = render(&tmpl, None, &fixed_stamp()).unwrap();
        assert!(doc.text.contains("# Variables: (none)"));
        assert_eq!(doc.vars_name, None);
        assert_eq!(body(&doc), "static = true");
    }

    #[test]
    fn empty_variables_file_is_empty_mapping() {
        let dir = TempDir::new().unwrap();
        let empty = write(&dir, "empty.yml", "");
        let null = write(&dir, "null.yml", "~\n");
        assert!(load_variables(Some(&empty)).unwrap().is_empty());
        assert!(load_variables(Some(&null)).unwrap().is_empty());
    }

    #[test]
    fn missing_variables_file() {
        let dir = TempDir::new().unwrap();
        let tmpl = write(&dir, "t.j2", "x");
        let result = render(&tmpl, Some(&dir.path().join("nope.yml")), &fixed_stamp());
        assert!(matches!(result, Err(RenderError::VariablesNotFound(_))));
    }

    #[test]
    fn malformed_variables_differ_from_missing_template() {
        let dir = TempDir::new().unwrap();
        let tmpl = write(&dir, "t.j2", "x");
        let vars = write(&dir, "bad.yml", "key: [unclosed\n");

        let bad_vars = render(&tmpl, Some(&vars), &fixed_stamp());
        assert!(matches!(bad_vars, Err(RenderError::VariablesParse { .. })));

        let no_template = render(&dir.path().join("missing.j2"), Some(&vars), &fixed_stamp());
        assert!(matches!(no_template, Err(RenderError::TemplateNotFound(_))));
    }

    #[test]
    fn sequence_variables_rejected() {
        let dir = TempDir::new().unwrap();
        let vars = write(&dir, "list.yml", "- a\n- b\n");
        let result = load_variables(Some(&vars));
        assert!(matches!(result, Err(RenderError::VariablesNotMapping(_))));
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let dir = TempDir::new().unwrap();
        let tmpl = write(&dir, "t.j2", "external_url '{{ missing }}'");
        let result = render(&tmpl, None, &fixed_stamp());
        assert!(matches!(result, Err(RenderError::Template { .. })));
    }

    #[test]
    fn syntax_error_is_an_error() {
        let dir = TempDir::new().unwrap();
        let tmpl = write(&dir, "t.j2", "{% if %}");
        let result = render(&tmpl, None, &fixed_stamp());
        match result {
            Err(RenderError::Template { name, .. }) => assert_eq!(name, "t.j2"),
            other => panic!("Expected Template error, got {other:?}"),
        }
    }
}
