use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::UnifiedTestResults;

pub const CSV_HEADER: &str = "test_name,status,duration_seconds,file,line";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Html,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "html" | "htm" => Ok(ExportFormat::Html),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Write `result` to `path` in the named format, creating parent directories.
pub fn export_results(
    result: &UnifiedTestResults,
    path: impl AsRef<Path>,
    format: &str,
) -> Result<PathBuf> {
    let format: ExportFormat = format.parse()?;
    let path = path.as_ref();

    let body = match format {
        ExportFormat::Json => serde_json::to_string_pretty(result)?,
        ExportFormat::Csv => to_csv(result),
        ExportFormat::Html => to_html(result),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::write(path, body).map_err(|e| Error::io(path, e))?;
    tracing::info!(path = %path.display(), format = ?format, "exported test results");
    Ok(path.to_path_buf())
}

pub fn to_csv(result: &UnifiedTestResults) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for test in &result.tests {
        let line = test.line.map(|l| l.to_string()).unwrap_or_default();
        let fields = [
            csv_field(&test.name),
            test.status.to_string(),
            test.duration.to_string(),
            csv_field(test.file.as_deref().unwrap_or("")),
            line,
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_html(result: &UnifiedTestResults) -> String {
    let summary = &result.summary;
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Test results: {project}</title>\n<style>\n\
         body {{ font-family: sans-serif; margin: 2em; }}\n\
         table {{ border-collapse: collapse; }}\n\
         th, td {{ border: 1px solid #ccc; padding: 4px 8px; text-align: left; }}\n\
         .passed, .xpass {{ color: #1a7f37; }}\n\
         .failed, .error {{ color: #cf222e; }}\n\
         .skipped, .xfail {{ color: #6e7781; }}\n\
         </style>\n</head>\n<body>\n<h1>Test results: {project}</h1>\n",
        project = escape_html(&result.project),
    );
    let _ = write!(
        html,
        "<p>Framework: {} &middot; Total: {} &middot; Passed: {} &middot; Failed: {} &middot; \
         Skipped: {} &middot; Errors: {} &middot; Success rate: {:.1}% &middot; Duration: {:.3}s</p>\n",
        result.framework.framework,
        summary.total,
        summary.passed,
        summary.failed,
        summary.skipped,
        summary.errors,
        summary.success_rate,
        summary.duration,
    );
    if let Some(error) = &result.error {
        let _ = writeln!(html, "<pre class=\"error\">{}</pre>", escape_html(error));
    }
    html.push_str("<table>\n<thead><tr><th>Test</th><th>Status</th><th>Duration (s)</th><th>File</th></tr></thead>\n<tbody>\n");
    for test in &result.tests {
        let duration = if test.is_timed() {
            format!("{:.3}", test.duration)
        } else {
            String::new()
        };
        let location = match (&test.file, test.line) {
            (Some(file), Some(line)) => format!("{}:{}", file, line),
            (Some(file), None) => file.clone(),
            _ => String::new(),
        };
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td class=\"{status}\">{status}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&test.name),
            duration,
            escape_html(&location),
            status = test.status,
        );
    }
    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    html
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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
