use std::path::Path;

use serde_json::Value;

/// Values substituted into `verify.*` argv templates.
#[derive(Clone, Debug, Default)]
pub struct Placeholders<'a> {
    pub build_dir: Option<&'a Path>,
    pub target: Option<&'a Path>,
    pub function: Option<&'a str>,
    pub inputs: &'a [Value],
}

/// Render one input as a command-line argument: strings verbatim, everything else as JSON.
pub fn render_input(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Expand placeholders. An argument that is exactly `{inputs}` becomes one argument per input;
/// elsewhere `{inputs}` is replaced by the inputs joined with spaces.
pub fn expand(template: &[String], p: &Placeholders<'_>) -> Vec<String> {
    let mut out = Vec::with_capacity(template.len() + p.inputs.len());
    for arg in template {
        if arg == "{inputs}" {
            out.extend(p.inputs.iter().map(render_input));
            continue;
        }
        let mut a = arg.clone();
        if let Some(d) = p.build_dir {
            a = a.replace("{build_dir}", &d.display().to_string());
        }
        if let Some(t) = p.target {
            a = a.replace("{target}", &t.display().to_string());
        }
        if let Some(f) = p.function {
            a = a.replace("{function}", f);
        }
        if a.contains("{inputs}") {
            let joined = p.inputs.iter().map(render_input).collect::<Vec<_>>().join(" ");
            a = a.replace("{inputs}", &joined);
        }
        out.push(a);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn argv(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn inputs_expand_to_separate_args() {
        let inputs = [json!(10), json!(0), json!("x y")];
        let p = Placeholders {
            build_dir: Some(Path::new("/tmp/b")),
            function: Some("divide"),
            inputs: &inputs,
            ..Default::default()
        };
        assert_eq!(
            expand(&argv(&["{build_dir}/harness", "{function}", "{inputs}"]), &p),
            argv(&["/tmp/b/harness", "divide", "10", "0", "x y"])
        );
        assert_eq!(expand(&argv(&["sh", "-c", "run {function} {inputs}"]), &p), argv(&["sh", "-c", "run divide 10 0 x y"]));
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let p = Placeholders::default();
        assert_eq!(expand(&argv(&["{target}", "{other}"]), &p), argv(&["{target}", "{other}"]));
    }
}
