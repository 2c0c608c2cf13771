//! HTML rendering of a built table, and handing the page to a browser.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tracing::{info, warn};

use crate::table::TableRow;

pub const DEFAULT_TITLE: &str = "Sequences Table";
/// Page banner shown above the table title.
pub const PAGE_HEADING: &str = "Laika Code Challenge 2024";

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
h1 {
  text-align: center;
}

table {
  border-collapse: collapse;
  width: 80%;
}

th, td {
  border: 2px solid #383838;
  text-align: left;
  padding: 8px;
}

tr:nth-child(odd) {
  background-color: #9e9e9e;
}

body {
  background-color: #e0e0e0;
}
</style>
</head>
<body>

<h1>{heading}</h1>

<h2>{title}</h2>

{table_html}

</body>
</html>
"#;

/// Renders `rows` as an HTML page with the default title.
pub fn render(rows: &[TableRow], labels: &[&str]) -> String {
    render_titled(DEFAULT_TITLE, rows, labels)
}

pub fn render_titled(title: &str, rows: &[TableRow], labels: &[&str]) -> String {
    let mut table_html = String::from("<table>\n<tr>");
    for label in labels {
        table_html.push_str(&format!("<th>{}</th>", escape(label)));
    }
    table_html.push_str("</tr>\n");

    for row in rows {
        table_html.push_str("<tr>");
        for label in labels {
            let cell = row.get(label).map(format_cell).unwrap_or_default();
            table_html.push_str(&format!("<td>{}</td>", escape(&cell)));
        }
        table_html.push_str("</tr>\n");
    }
    table_html.push_str("</table>");

    TEMPLATE
        .replace("{heading}", &escape(PAGE_HEADING))
        .replace("{title}", &escape(title))
        .replace("{table_html}", &table_html)
}

/// Plain-text form of a cell value.
///
/// Entity dicts show their `name` or `code`, lists are comma-joined and
/// nulls are blank.
pub fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(format_cell).collect::<Vec<_>>().join(", "),
        Value::Object(obj) => match obj.get("name").or_else(|| obj.get("code")) {
            Some(label) => format_cell(label),
            None => value.to_string(),
        },
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Writes `markup` to `output`, or to a kept temp file named
/// `*_sequence_table.html`, and returns the path written.
pub fn write_html(markup: &str, output: Option<&Path>) -> io::Result<PathBuf> {
    let path = match output {
        Some(path) => {
            fs::write(path, markup)?;
            path.to_path_buf()
        }
        None => {
            let file = tempfile::Builder::new()
                .prefix("sequence_table_")
                .suffix("_sequence_table.html")
                .tempfile()?;
            fs::write(file.path(), markup)?;
            let (_, path) = file.keep()?;
            path
        }
    };
    info!(path = %path.display(), "wrote table html");
    Ok(path)
}

/// Writes the page and opens it in the user's browser.
pub fn display(markup: &str, output: Option<&Path>) -> io::Result<PathBuf> {
    let path = write_html(markup, output)?;
    if let Err(err) = open_in_browser(&path) {
        warn!(path = %path.display(), error = %err, "could not launch a browser");
    }
    Ok(path)
}

fn open_in_browser(path: &Path) -> io::Result<()> {
    let mut command = match std::env::var_os("BROWSER") {
        Some(browser) => Command::new(browser),
        None => platform_opener(),
    };
    command.arg(path).spawn()?;
    Ok(())
}

#[cfg(target_os = "macos")]
fn platform_opener() -> Command {
    Command::new("open")
}

#[cfg(target_os = "windows")]
fn platform_opener() -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", ""]);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_opener() -> Command {
    Command::new("xdg-open")
}
