//! List command implementation.

use super::{CliResult, Session};
use fdb_core::{ListElement, ListOptions};
use std::io::{self, Write};

/// Runs the list command.
pub fn run(
    session: &Session,
    request: Option<&str>,
    duplicates: bool,
    keys: bool,
    schema: bool,
    format: &str,
) -> CliResult<()> {
    let fdb = session.open()?;
    let options = ListOptions::default()
        .duplicates(duplicates)
        .keys(keys)
        .schema(schema);
    let listing = fdb.list(request.map(Into::into), options)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        "json" => {
            let elements = listing.collect::<Result<Vec<_>, _>>()?;
            let text = serde_json::to_string_pretty(&elements).map_err(io::Error::other)?;
            writeln!(out, "{text}")?;
        }
        _ => {
            for element in listing {
                writeln!(out, "{}", format_element(&element?))?;
            }
        }
    }
    Ok(())
}

fn format_element(element: &ListElement) -> String {
    let mut line = String::new();
    if let Some(schema) = &element.schema {
        let levels: Vec<String> = schema
            .values()
            .map(|fields| {
                let pairs: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
                format!("{{{}}}", pairs.join(","))
            })
            .collect();
        line.push_str(&levels.concat());
        line.push(' ');
    } else if let Some(keys) = &element.keys {
        let pairs: Vec<String> = keys.iter().map(|(k, v)| format!("{k}={v}")).collect();
        line.push_str(&format!("{{{}}} ", pairs.join(",")));
    }
    line.push_str(&format!(
        "{} offset={} length={}",
        element.path, element.offset, element.length
    ));
    line
}
