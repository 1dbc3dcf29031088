use super::{Project, Spec};
use std::fmt::Write;

pub const NO_PROJECT_HTML: &str = concat!(
    "<div class=\"jp-projspec-no-project\">",
    "<p>No project detected in this directory.</p>",
    "<p>projspec can detect Python packages, Rust crates, ",
    "Node.js projects, conda-project, pixi, uv, poetry, and more.</p>",
    "</div>"
);

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

pub fn render(project: &Project) -> String {
    let mut out = String::new();
    render_into(&mut out, project);
    out
}

fn render_into(out: &mut String, project: &Project) {
    let _ = write!(out, "<div class=\"jp-projspec-project\"><h3>{}</h3>", escape(&project.url));
    if !project.specs.is_empty() {
        out.push_str("<ul class=\"jp-projspec-specs\">");
        for (name, spec) in &project.specs {
            render_spec(out, name, spec);
        }
        out.push_str("</ul>");
    }
    if !project.children.is_empty() {
        out.push_str("<details class=\"jp-projspec-children\"><summary>Children</summary>");
        for (subpath, child) in &project.children {
            let _ = write!(out, "<div class=\"jp-projspec-child\" data-subpath=\"{}\">", escape(subpath));
            render_into(out, child);
            out.push_str("</div>");
        }
        out.push_str("</details>");
    }
    out.push_str("</div>");
}

fn render_spec(out: &mut String, name: &str, spec: &Spec) {
    let _ = write!(out, "<li class=\"jp-projspec-spec\"><strong>{}</strong>", escape(name));
    if !spec.contents.is_empty() {
        let keys: Vec<String> = spec.contents.keys().map(|k| escape(k)).collect();
        let _ = write!(out, "<div>Contents: {}</div>", keys.join(", "));
    }
    if !spec.artifacts.is_empty() {
        out.push_str("<table class=\"jp-projspec-artifacts\">");
        for (k, v) in &spec.artifacts {
            let shown = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Object(o) => o
                    .get("cmd")
                    .and_then(|c| c.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| v.to_string()),
                other => other.to_string(),
            };
            let _ = write!(out, "<tr><td>{}</td><td><code>{}</code></td></tr>", escape(k), escape(&shown));
        }
        out.push_str("</table>");
    }
    out.push_str("</li>");
}
