//! User-facing terminal output
//!
//! Messages for the user go to stderr without log decoration; located
//! symbols go to stdout, either as JSON or as colored `path:line:col` lines.

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::io::IsTerminal;

use crate::models::LocatedSymbol;

/// Display a warning message to the user in yellow with padding
pub fn warn(message: &str) {
    eprintln!("\n{}\n", message.yellow());
}

/// Display an error message to the user in red with padding
///
/// # Example
/// ```ignore
/// output::error("Not inside an Azure DevOps repository.");
/// ```
pub fn error(message: &str) {
    eprintln!("\n{}\n", message.red());
}

/// Display an informational message to the user with padding
pub fn info(message: &str) {
    eprintln!("\n{}\n", message);
}

/// Print any serializable value as JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

/// Whether colored output should be used on stdout
pub fn use_colors(plain: bool) -> bool {
    !plain && std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

/// One `path:line:column  text` line per symbol, lines and columns 1-based
pub fn format_symbol(symbol: &LocatedSymbol, colors: bool) -> String {
    let line = symbol.start_line + 1;
    let column = symbol.start_column + 1;
    if colors {
        format!(
            "{}:{}:{}  {}",
            symbol.file_path.cyan(),
            line.yellow(),
            column.yellow(),
            symbol.text.bold()
        )
    } else {
        format!("{}:{}:{}  {}", symbol.file_path, line, column, symbol.text)
    }
}

pub fn print_symbols(symbols: &[LocatedSymbol], plain: bool) {
    if symbols.is_empty() {
        info("No results found.");
        return;
    }

    let colors = use_colors(plain);
    for symbol in symbols {
        println!("{}", format_symbol(symbol, colors));
    }

    let summary = format!("{} result(s)", symbols.len());
    if colors {
        eprintln!("{}", summary.dimmed());
    } else {
        eprintln!("{}", summary);
    }
}
