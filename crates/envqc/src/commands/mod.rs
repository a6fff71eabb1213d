// crates/envqc/src/commands/mod.rs

use anyhow::Result;
use comfy_table::Table;
use polars::prelude::*;

use crate::input::Settings;

pub mod detect;
pub mod preprocess;

pub fn handle_datasets(settings: &Settings) -> Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["dataset", "overridden stages"]);

    for id in settings.registry.dataset_ids() {
        let stages = settings
            .registry
            .get(id)
            .map(|chain| {
                chain
                    .overrides()
                    .overridden()
                    .iter()
                    .map(|stage| stage.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        table.add_row(vec![id.code().to_string(), stages]);
    }

    println!("{table}");
    Ok(())
}

/// Renders up to `limit` rows of `df` with the given columns (all columns when empty).
pub(crate) fn render_rows(df: &DataFrame, columns: &[String], limit: usize) -> Result<Table> {
    let names: Vec<String> = if columns.is_empty() {
        df.get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    } else {
        columns.to_vec()
    };
    let selected: Vec<&Column> = names
        .iter()
        .map(|name| df.column(name))
        .collect::<PolarsResult<_>>()?;

    let mut table = Table::new();
    table.set_header(names.clone());
    for idx in 0..df.height().min(limit) {
        let cells = selected
            .iter()
            .map(|column| column.get(idx).map(|value| format_cell(&value)))
            .collect::<PolarsResult<Vec<String>>>()?;
        table.add_row(cells);
    }
    Ok(table)
}

fn format_cell(value: &AnyValue) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::Float64(v) => format!("{v:.3}"),
        AnyValue::Float32(v) => format!("{v:.3}"),
        AnyValue::String(s) => s.to_string(),
        other => other.to_string(),
    }
}
