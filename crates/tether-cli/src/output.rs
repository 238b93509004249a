//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;
use serde_json::Value;

use tether_core::{ApiResponse, QueuedMutation, ReplayReport};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print an API response
    pub fn print_response(&self, response: &ApiResponse) {
        match self.format {
            OutputFormat::Human => {
                if response.from_cache {
                    let note = if response.stale {
                        "offline, cached copy is stale"
                    } else {
                        "offline, cached copy"
                    };
                    eprintln!("({})", note);
                }
                println!("{}", pretty(&response.body));
            }
            OutputFormat::Json => {
                print_json(&serde_json::json!({
                    "status": response.status,
                    "from_cache": response.from_cache,
                    "stale": response.stale,
                    "body": response.body,
                }));
            }
            OutputFormat::Quiet => {
                println!("{}", compact(&response.body));
            }
        }
    }

    /// Print pending queue entries
    pub fn print_queue(&self, items: &[QueuedMutation]) {
        match self.format {
            OutputFormat::Human => {
                if items.is_empty() {
                    println!("Offline queue is empty.");
                    return;
                }
                for item in items {
                    println!(
                        "{} | {:<6} | {} | {}",
                        &item.id.to_string()[..8],
                        item.method(),
                        truncate(item.path(), 45),
                        item.enqueued_at.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("\n{} pending write(s)", items.len());
            }
            OutputFormat::Json => print_json(items),
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.id);
                }
            }
        }
    }

    /// Print the outcome of a replay pass
    pub fn print_replay(&self, report: &ReplayReport) {
        match self.format {
            OutputFormat::Human => {
                if report.replayed == 0 && report.remaining == 0 {
                    println!("Nothing to replay.");
                    return;
                }
                println!("Delivered: {}", report.replayed);
                println!("Remaining: {}", report.remaining);
                if let Some(ref reason) = report.halted {
                    println!("Stopped:   {}", reason);
                }
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => println!("{}", report.remaining),
        }
    }

    /// Print a realtime event
    pub fn print_event(&self, event: &str, data: &Value) {
        match self.format {
            OutputFormat::Human => println!("[{}] {}", event, compact(data)),
            OutputFormat::Json => print_json(&serde_json::json!({"event": event, "data": data})),
            OutputFormat::Quiet => println!("{}", compact(data)),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to format output: {}", e),
    }
}

fn pretty(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
