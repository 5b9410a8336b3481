use std::collections::BTreeMap;

use alloy_primitives::I256;
use alloy_primitives::utils::format_units;
use comfy_table::{Cell, CellAlignment, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde::Serialize;

use crate::accumulator::BalanceMap;

pub const DEFAULT_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

/// Raw integer amount in whole units, e.g. `10^16` with 18 decimals is `0.010000000000000000`.
pub fn to_decimal(value: I256, decimals: u8) -> String {
    format_units(value, decimals).unwrap_or_else(|_| value.to_string())
}

pub fn format_balances(
    address: &str,
    balances: &BalanceMap,
    decimals: u8,
    format: &OutputFormat,
) -> String {
    match format {
        OutputFormat::Table => format_balances_table(address, balances, decimals),
        OutputFormat::Json => format_balances_json(address, balances, decimals),
        OutputFormat::Csv => format_balances_csv(balances, decimals),
    }
}

fn format_balances_table(address: &str, balances: &BalanceMap, decimals: u8) -> String {
    if balances.is_empty() {
        return format!("No balances found for {address}.");
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Token", "Balance", "Balance (raw)"]);

    for (symbol, balance) in balances.iter() {
        table.add_row(vec![
            Cell::new(symbol),
            Cell::new(to_decimal(*balance, decimals)).set_alignment(CellAlignment::Right),
            Cell::new(balance.to_string()).set_alignment(CellAlignment::Right),
        ]);
    }

    format!("Balances of {address}\n{table}")
}

#[derive(Serialize)]
struct BalanceReport<'a> {
    address: &'a str,
    balances: BTreeMap<&'a str, TokenBalance>,
}

#[derive(Serialize)]
struct TokenBalance {
    balance: String,
    raw: String,
}

fn format_balances_json(address: &str, balances: &BalanceMap, decimals: u8) -> String {
    let report = BalanceReport {
        address,
        balances: balances
            .iter()
            .map(|(symbol, balance)| {
                (
                    symbol,
                    TokenBalance {
                        balance: to_decimal(*balance, decimals),
                        raw: balance.to_string(),
                    },
                )
            })
            .collect(),
    };

    serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
}

fn format_balances_csv(balances: &BalanceMap, decimals: u8) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    let _ = wtr.write_record(["token", "balance", "raw"]);
    for (symbol, balance) in balances.iter() {
        let _ = wtr.write_record([
            symbol.to_string(),
            to_decimal(*balance, decimals),
            balance.to_string(),
        ]);
    }

    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}
