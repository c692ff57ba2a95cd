use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::jobs::PageFailure;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub total_pages: u64,
    pub resolved_pages: u64,
    pub unresolved_pages: u64,
    pub poll_sweeps: u64,
    pub failures: Vec<Map<String, Value>>,
}

impl RunSummary {
    pub fn failure_rows(failures: &[PageFailure]) -> Vec<Map<String, Value>> {
        failures
            .iter()
            .map(|failure| {
                let mut row = Map::new();
                row.insert("book_index".to_string(), Value::Number(failure.key.book.into()));
                row.insert("page_index".to_string(), Value::Number(failure.key.page.into()));
                row.insert(
                    "book_title".to_string(),
                    Value::String(failure.book_title.clone()),
                );
                row.insert(
                    "page_number".to_string(),
                    Value::Number(failure.page_number.into()),
                );
                row.insert(
                    "kind".to_string(),
                    Value::String(failure.error.kind().to_string()),
                );
                row.insert(
                    "message".to_string(),
                    Value::String(failure.error.to_string()),
                );
                row
            })
            .collect()
    }
}

pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
