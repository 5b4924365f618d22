//! CLI Output Formatting.
//!
//! Renders plans, cycle reports and simulation results as styled text or
//! JSON. Text renderers return `String`s so they can be tested; the
//! `print_*` wrappers write them to stdout.

use chrono::{DateTime, Utc};
use console::{style, StyledObject};
use serde::Serialize;
use std::fmt::Write as _;

use crate::cli::simulation::{MarketSnapshot, SimulationReport};
use crate::core::config::PegTarget;
use crate::peg::controller::{CycleReport, SymbolOutcome};
use crate::peg::keeper::StopReason;
use crate::peg::planner::{PegDecision, PoolState};
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT FORMAT
// ═══════════════════════════════════════════════════════════════════════════════

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
    /// Pretty JSON format
    JsonPretty,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Whether output is JSON
    pub fn is_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::JsonPretty)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT FORMATTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Output formatter for CLI
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    format: OutputFormat,
    color: bool,
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Text)
    }
}

impl OutputFormatter {
    /// Create new formatter, colored when stdout is a terminal
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            color: console::colors_enabled(),
        }
    }

    /// Disable color
    pub fn without_color(mut self) -> Self {
        self.color = false;
        self
    }

    /// Get format
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn paint<D>(&self, styled: StyledObject<D>) -> StyledObject<D> {
        styled.force_styling(self.color)
    }

    /// Print success message
    pub fn success(&self, message: &str) {
        self.status("success", message, || {
            println!("{} {}", self.paint(style("✓").green()), message)
        });
    }

    /// Print error message
    pub fn error(&self, message: &str) {
        self.status("error", message, || {
            eprintln!("{} {}", self.paint(style("✗").red()), message)
        });
    }

    /// Print warning message
    pub fn warning(&self, message: &str) {
        self.status("warning", message, || {
            println!("{} {}", self.paint(style("⚠").yellow()), message)
        });
    }

    /// Print info message
    pub fn info(&self, message: &str) {
        self.status("info", message, || {
            println!("{} {}", self.paint(style("ℹ").blue()), message)
        });
    }

    fn status(&self, status: &str, message: &str, text: impl FnOnce()) {
        if self.format.is_json() {
            self.print_json(&serde_json::json!({ "status": status, "message": message }));
        } else {
            text();
        }
    }

    /// Print serializable data as JSON regardless of format
    pub fn print_json<T: Serialize>(&self, data: &T) {
        let output = if matches!(self.format, OutputFormat::JsonPretty) {
            serde_json::to_string_pretty(data)
        } else {
            serde_json::to_string(data)
        };
        match output {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("failed to encode output: {}", e),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RENDERERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn section(&self, out: &mut String, title: &str) {
        let _ = writeln!(out, "{}", self.paint(style(format!("=== {} ===", title)).cyan().bold()));
    }

    fn kv(&self, out: &mut String, key: &str, value: impl std::fmt::Display) {
        let _ = writeln!(out, "  {}: {}", self.paint(style(key).bold()), value);
    }

    /// Planner decision for one pool
    pub fn render_plan(&self, target: &PegTarget, pool: &PoolState, decision: &PegDecision) -> String {
        let mut out = String::new();
        self.section(&mut out, &format!("Correction plan: {}", target.symbol));
        self.kv(&mut out, "Token reserve", wad(pool.token_reserve));
        self.kv(&mut out, "Stable reserve", wad(pool.stable_reserve));
        self.kv(&mut out, "Target price", wad(target.target_price));
        match decision {
            PegDecision::Act(plan) => {
                self.kv(&mut out, "Pool price", wad(plan.price));
                self.kv(&mut out, "Deviation", self.deviation(plan.deviation_bps));
                self.kv(&mut out, "Side", self.paint(style(plan.side).magenta()));
                self.kv(&mut out, "Full correction", wad(plan.full_amount_in));
                let capped = if plan.capped { " (capped)" } else { "" };
                self.kv(&mut out, "Amount in", format!("{}{}", wad(plan.amount_in), capped));
                self.kv(&mut out, "Expected out", wad(plan.expected_out));
            }
            PegDecision::Skip(reason) => {
                self.kv(&mut out, "Decision", self.paint(style(format!("skip: {}", reason)).dim()));
            }
        }
        out
    }

    /// One keeper cycle
    pub fn render_cycle(&self, report: &CycleReport) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} block {} at {}: {} traded, {} skipped, {} failed",
            self.paint(style("cycle").bold()),
            report.block_number,
            timestamp(report.timestamp),
            report.traded(),
            report.skipped(),
            report.failed()
        );
        for line in &report.symbols {
            let outcome = match &line.outcome {
                SymbolOutcome::Traded {
                    side,
                    deviation_bps,
                    amount_in,
                    amount_out,
                    partial,
                } => format!(
                    "{} {} in {} for {} out at {}{}",
                    self.paint(style("traded").green()),
                    side,
                    wad(*amount_in),
                    wad(*amount_out),
                    self.deviation(*deviation_bps),
                    if *partial { " (partial)" } else { "" }
                ),
                SymbolOutcome::Skipped(reason) => {
                    format!("{} {}", self.paint(style("skipped").dim()), reason)
                }
                SymbolOutcome::Failed(err) => format!(
                    "{} [{}] {}",
                    self.paint(style("failed").red()),
                    err.code(),
                    err
                ),
            };
            let _ = writeln!(out, "  {:<8} {}", line.symbol, outcome);
        }
        out
    }

    fn render_markets(&self, out: &mut String, markets: &[MarketSnapshot]) {
        for m in markets {
            let deviation = m
                .deviation_bps
                .map(|d| self.deviation(d))
                .unwrap_or_else(|| "-".into());
            let _ = writeln!(
                out,
                "  {:<8} price {:<24} target {:<12} deviation {}",
                m.symbol,
                wad(m.price),
                m.target_price.map(wad).unwrap_or_else(|| "-".into()),
                deviation
            );
        }
    }

    /// Full simulation result
    pub fn render_simulation(&self, report: &SimulationReport) -> String {
        let mut out = String::new();
        self.section(&mut out, "Markets before");
        self.render_markets(&mut out, &report.before);
        let _ = writeln!(out);

        self.section(&mut out, "Cycles");
        for cycle in &report.cycles {
            out.push_str(&self.render_cycle(cycle));
        }
        for (block, err) in &report.aborted {
            let _ = writeln!(out, "{} block {}: {}", self.paint(style("aborted").red().bold()), block, err);
        }
        let _ = writeln!(out);

        self.section(&mut out, "Markets after");
        self.render_markets(&mut out, &report.after);
        let ratio = report
            .collateral_ratio_bps
            .map(|r| format!("{} bps", r))
            .unwrap_or_else(|| "no supply".into());
        self.kv(&mut out, "Collateral ratio", ratio);
        if let Some(reason) = &report.stop_reason {
            self.kv(&mut out, "Stopped", self.stop_reason(reason));
        }
        self.kv(&mut out, "Generated", Utc::now().to_rfc3339());
        out
    }

    fn stop_reason(&self, reason: &StopReason) -> String {
        let styled = match reason {
            StopReason::MaxCycles { .. } => style(reason.to_string()).green(),
            _ => style(reason.to_string()).red().bold(),
        };
        self.paint(styled).to_string()
    }

    fn deviation(&self, bps: i128) -> String {
        let text = format!("{:+} bps", bps);
        self.paint(if bps > 0 { style(text).yellow() } else { style(text).cyan() })
            .to_string()
    }

    /// Print a plan in the configured format
    pub fn print_plan(&self, target: &PegTarget, pool: &PoolState, decision: &PegDecision) {
        if self.format.is_json() {
            self.print_json(&serde_json::json!({
                "symbol": target.symbol,
                "pool": pool,
                "target_price": target.target_price,
                "decision": decision,
            }));
        } else {
            print!("{}", self.render_plan(target, pool, decision));
        }
    }

    /// Print a simulation result in the configured format
    pub fn print_simulation(&self, report: &SimulationReport) {
        if self.format.is_json() {
            self.print_json(report);
        } else {
            print!("{}", self.render_simulation(report));
        }
    }
}

/// Fixed-point amount as a decimal string
pub fn wad(amount: u128) -> String {
    FixedPoint::from_raw(amount).to_string()
}

/// Unix timestamp as RFC 3339, or the raw seconds if out of range
pub fn timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
