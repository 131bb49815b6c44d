//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is a NewEvent. Output lines are either:
//! - An incident request handed to the incident collaborator (with its id)
//! - An ErrorOutput (when input validation fails)
//! - The final Statistics snapshot once stdin is exhausted
//!
//! Logs go to stderr so stdout stays machine-readable.

use clap::Parser;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use event_engine::types::ErrorOutput;
use event_engine::{EngineError, EventManager, IncidentError, IncidentRequest, IncidentSink, NewEvent, RuleSet};

/// Event correlation and escalation engine
#[derive(Parser, Debug)]
#[command(name = "event-engine")]
#[command(version)]
#[command(about = "Correlate monitoring events and escalate significant patterns into incidents")]
struct Args {
  /// TOML file with engine settings, rules and correlation definitions
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Enable debug logging
  #[arg(short, long)]
  debug: bool,

  /// Seconds to wait for queued events to finish once stdin closes
  #[arg(long, default_value = "30")]
  drain_secs: u64,
}

#[derive(Serialize)]
struct IncidentLine<'a> {
  incident_id: &'a str,
  #[serde(flatten)]
  request: &'a IncidentRequest,
}

/// Prints incident requests as JSON lines. Ids are stable: a hash of the
/// source event ids.
struct StdoutSink;

impl IncidentSink for StdoutSink {
  fn create_incident(&self, request: &IncidentRequest) -> Result<String, IncidentError> {
    let mut hasher = blake3::Hasher::new();
    for id in &request.source_event_ids {
      hasher.update(id.as_bytes());
      hasher.update(b"|");
    }
    let hex = hasher.finalize().to_hex();
    let incident_id = format!("inc-{}", &hex[..16]);

    let line = IncidentLine {
      incident_id: &incident_id,
      request,
    };
    write_line(&mut io::stdout(), &line).map_err(|e| IncidentError::Unavailable(e.to_string()))?;
    Ok(incident_id)
  }
}

/// Write one JSON line in a single call so concurrent writers never interleave.
fn write_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), EngineError> {
  let mut buf = serde_json::to_vec(value)?;
  buf.push(b'\n');
  out.write_all(&buf)?;
  out.flush()?;
  Ok(())
}

fn init_logging(debug: bool) {
  let default = if debug { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

#[tokio::main]
async fn main() {
  let args = Args::parse();
  init_logging(args.debug);

  if let Err(e) = run(args).await {
    error!(error = %e, "event-engine failed");
    std::process::exit(1);
  }
}

async fn run(args: Args) -> Result<(), EngineError> {
  let set = match &args.config {
    Some(path) => RuleSet::load(path)?,
    None => RuleSet::default(),
  };
  let manager = EventManager::from_rule_set(set, Arc::new(StdoutSink))?;
  manager.start()?;

  let intake = read_events(BufReader::new(tokio::io::stdin()), &manager, &mut io::stdout()).await;
  if let Err(e) = &intake {
    error!(error = %e, "stdin intake stopped");
  }

  if !manager.wait_until_idle(Duration::from_secs(args.drain_secs)).await {
    info!("stdin closed with events still queued");
  }
  manager.stop().await;
  write_line(&mut io::stdout(), &manager.get_statistics())?;
  intake
}

/// Feed JSON lines into the manager. Lines that are not UTF-8, not JSON, or
/// not a valid event get an `ErrorOutput` line on `out` and are skipped.
async fn read_events<R, W>(reader: R, manager: &EventManager, out: &mut W) -> Result<(), EngineError>
where
  R: AsyncBufRead + Unpin,
  W: Write,
{
  let mut segments = reader.split(b'\n');
  while let Some(bytes) = segments.next_segment().await? {
    let line = match std::str::from_utf8(&bytes) {
      Ok(s) => s.trim(),
      Err(e) => {
        write_line(out, &ErrorOutput::new(format!("invalid utf-8: {}", e)))?;
        continue;
      }
    };
    // Skip blank lines.
    if line.is_empty() {
      continue;
    }

    let raw: NewEvent = match serde_json::from_str(line) {
      Ok(v) => v,
      Err(e) => {
        write_line(out, &ErrorOutput::new(format!("json parse: {}", e)))?;
        continue;
      }
    };

    if let Err(e) = manager.create_event(raw) {
      let err = match &e {
        EngineError::Validation { field, reason } => ErrorOutput::new(reason.clone()).with_field(field.clone()),
        _ => ErrorOutput::new(e.to_string()),
      };
      write_line(out, &err)?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use event_engine::RecordingSink;

  #[tokio::test]
  async fn bad_lines_are_reported_and_skipped() {
    let manager = EventManager::with_defaults(Arc::new(RecordingSink::new()));
    let input: &[u8] = b"{\"title\":\"disk full\",\"source_system\":\"zabbix\"}\n\xff\xfe\n{not json\n\n{\"title\":\"\",\"source_system\":\"zabbix\"}\n";
    let mut out = Vec::new();

    read_events(BufReader::new(input), &manager, &mut out).await.unwrap();

    let lines: Vec<serde_json::Value> = out
      .split(|b| *b == b'\n')
      .filter(|l| !l.is_empty())
      .map(|l| serde_json::from_slice(l).unwrap())
      .collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l["error"] == true));
    assert!(lines[0]["message"].as_str().unwrap().starts_with("invalid utf-8"));
    assert!(lines[1]["message"].as_str().unwrap().starts_with("json parse"));
    assert_eq!(lines[2]["field"], "title");
    assert_eq!(manager.get_statistics().queue_size, 1);
  }
}
