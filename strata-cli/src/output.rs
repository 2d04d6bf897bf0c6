//! Human and JSON rendering of registry results

use anyhow::Result;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use strata_core::api::{LocalSummary, OverlayInfo, OverlaySummary};
use strata_core::RegistryApi;

const DESCRIPTION_WIDTH: usize = 50;

#[derive(Tabled)]
struct RemoteRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Flags")]
    flags: String,
    #[tabled(rename = "Type")]
    source_type: String,
    #[tabled(rename = "Priority")]
    priority: i32,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct LocalRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Type")]
    source_type: String,
    #[tabled(rename = "Priority")]
    priority: i32,
    #[tabled(rename = "Path")]
    path: String,
}

fn truncate(text: &str) -> String {
    if text.chars().count() > DESCRIPTION_WIDTH {
        let head: String = text.chars().take(DESCRIPTION_WIDTH - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// `*` installed, `!` unsupported, `?` unofficial
fn flags(row: &OverlaySummary) -> String {
    let mut flags = String::new();
    flags.push(if row.installed.is_some() { '*' } else { ' ' });
    flags.push(if row.supported { ' ' } else { '!' });
    flags.push(if row.official { ' ' } else { '?' });
    flags
}

fn print_table<T: Tabled>(rows: &[T]) {
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
}

pub fn print_remote(rows: &[OverlaySummary], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No overlays available. Run 'strata fetch' to retrieve the catalog.");
        return Ok(());
    }

    let table_rows: Vec<RemoteRow> = rows
        .iter()
        .map(|row| RemoteRow {
            name: row.name.clone(),
            flags: flags(row),
            source_type: row.source_type.clone(),
            priority: row.priority,
            description: truncate(&row.description),
        })
        .collect();
    print_table(&table_rows);
    println!("* installed  ! no supported source type  ? unofficial");
    Ok(())
}

pub fn print_local(rows: &[LocalSummary], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No overlays installed.");
        return Ok(());
    }

    let table_rows: Vec<LocalRow> = rows
        .iter()
        .map(|row| LocalRow {
            name: row.name.clone(),
            state: row.state.to_string(),
            source_type: row.source_type.clone(),
            priority: row.priority,
            path: row.path.display().to_string(),
        })
        .collect();
    print_table(&table_rows);
    Ok(())
}

pub fn print_info(infos: &[OverlayInfo]) {
    for (index, info) in infos.iter().enumerate() {
        if index > 0 {
            println!();
        }
        print!("{}", info.text);

        let installed = info
            .state
            .map(|state| state.to_string())
            .unwrap_or_else(|| "no".to_string());
        println!(
            "\nOfficial: {}; Supported: {}; Installed: {}",
            yes_no(info.official),
            yes_no(info.supported),
            installed
        );
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Warnings and errors collected by the last operation, on stderr
pub fn print_messages(api: &RegistryApi) {
    for warning in api.warnings() {
        eprintln!("Warning: {warning}");
    }
    for error in api.errors() {
        eprintln!("Error: {}", format_error(&error.error));
    }
}

/// Error message followed by its source chain
fn format_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
