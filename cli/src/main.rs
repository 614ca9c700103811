//! cdcrelay: invocation entry point for the relay and consumer stages.
//!
//! Reads one invocation payload per line on stdin (or from `--input`), runs
//! the selected stage on it and writes one partial-failure report per line
//! to stdout.
//!
//! ```text
//! cdcrelay relay   < stream-batches.jsonl
//! cdcrelay consume < queue-batches.jsonl
//! cdcrelay info
//! ```
//!
//! Configuration comes from the environment (see `cdcrelay info`). Missing
//! required variables abort before any payload is read. Logs go to stderr.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;

use cdcrelay_bus::{HttpBusConfig, HttpFanoutBus, MemoryBus};
use cdcrelay_consumer::{ConsumerDispatcher, LoggingSink};
use cdcrelay_core::{
    CommonConfig, ConsumerConfig, FanoutBus, InvocationContext, PartialFailureReport, QueueBatch,
    RelayConfig, StreamBatch,
};
use cdcrelay_observability::{init_tracing, LogConfig};
use cdcrelay_relay::RelayPublisher;

#[derive(Parser)]
#[command(
    name = "cdcrelay",
    about = "Relay change-stream batches through a fan-out bus with partial-batch failure reporting",
    long_about = "
Relay change-stream batches through a fan-out bus with partial-batch failure reporting.

ENVIRONMENT VARIABLES:
  AWS_REGION              Region of the bus and queue            [required]
  PUBLISH_TOPIC_ARN       Topic the relay publishes to           [required for relay]
  BUS_ENDPOINT            Publish endpoint, or 'memory'          [required for relay]
  LOG_LEVEL               trace | debug | info | warn | error    (default: INFO)
  LOG_FORMAT              text | json                            (default: text)
  MAX_CONCURRENCY         Per-batch concurrency cap, 1 = serial  (default: batch size)
  INVOCATION_TIMEOUT_MS   Deadline per invocation                (default: none)
  DEADLINE_MARGIN_MS      Time reserved to build the report      (default: 500)
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish change-stream batches to the fan-out topic
    Relay {
        /// Read payloads from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Unwrap queue batches and hand each change record to the sink
    Consume {
        /// Read payloads from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Show the effective configuration
    Info,
}

/// Reported for a payload that is not a batch at all.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationError {
    error_type: &'static str,
    error_message: String,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Relay,
    Consume,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env = |name: &str| std::env::var(name).ok();

    match cli.command {
        Commands::Relay { input } => {
            run_stage(Stage::Relay, env, || open_input(input), std::io::stdout()).await
        }
        Commands::Consume { input } => {
            run_stage(Stage::Consume, env, || open_input(input), std::io::stdout()).await
        }
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn open_input(path: Option<PathBuf>) -> Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(&path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    })
}

/// Load configuration and start logging, then answer every invocation.
/// Input is only opened once the configuration is known to be valid.
async fn run_stage<R, W>(
    stage: Stage,
    lookup: impl Fn(&str) -> Option<String>,
    open: impl FnOnce() -> Result<R>,
    output: W,
) -> Result<()>
where
    R: BufRead,
    W: Write,
{
    match stage {
        Stage::Relay => {
            let config = RelayConfig::from_lookup(&lookup).context("relay configuration")?;
            init_logging("stream-reader", &config.common);
            let relay = RelayPublisher::from_config(build_bus(&config)?, &config);
            let relay = &relay;
            serve(open()?, output, &config.common, move |batch: StreamBatch, ctx| async move {
                relay.handle_batch(batch, &ctx).await
            })
            .await
        }
        Stage::Consume => {
            let config = ConsumerConfig::from_lookup(&lookup).context("consumer configuration")?;
            init_logging("queue-consumer", &config.common);
            let dispatcher = ConsumerDispatcher::from_config(Arc::new(LoggingSink), &config);
            let dispatcher = &dispatcher;
            serve(open()?, output, &config.common, move |batch: QueueBatch, ctx| async move {
                dispatcher.handle_batch(batch, &ctx).await
            })
            .await
        }
    }
}

fn init_logging(service: &str, common: &CommonConfig) {
    if let Err(e) = init_tracing(&LogConfig::for_service(service, common)) {
        eprintln!("warning: logging already initialised: {e}");
    }
}

fn build_bus(config: &RelayConfig) -> Result<Arc<dyn FanoutBus>> {
    if config.bus_endpoint == "memory" {
        tracing::warn!("BUS_ENDPOINT=memory: published messages are kept in-process only");
        return Ok(Arc::new(MemoryBus::new()));
    }
    let bus: Arc<dyn FanoutBus> = HttpFanoutBus::shared(&config.bus_endpoint, HttpBusConfig::default())
        .context("building bus client")?;
    Ok(bus)
}

/// Run `handle` once per input line, in order, writing one result line per
/// invocation. Invocations never overlap. `output` is only touched between
/// invocations, never while record tasks are running.
async fn serve<B, F, Fut, R, W>(input: R, mut output: W, common: &CommonConfig, handle: F) -> Result<()>
where
    B: DeserializeOwned,
    F: Fn(B, InvocationContext) -> Fut,
    Fut: std::future::Future<Output = PartialFailureReport>,
    R: BufRead,
    W: Write,
{
    let timeout = common.invocation_timeout_ms.map(Duration::from_millis);

    for line in input.lines() {
        let line = line.context("reading invocation payload")?;
        if line.trim().is_empty() {
            continue;
        }

        let mut ctx = InvocationContext::new(uuid::Uuid::new_v4().to_string());
        if let Some(t) = timeout {
            ctx = ctx.with_timeout(t);
        }

        let result = match serde_json::from_str::<B>(&line) {
            Ok(batch) => serde_json::to_string(&handle(batch, ctx).await)?,
            Err(e) => {
                tracing::error!(request_id = %ctx.request_id, error = %e, "invalid invocation payload");
                serde_json::to_string(&InvocationError {
                    error_type: "InvalidPayload",
                    error_message: e.to_string(),
                })?
            }
        };
        writeln!(output, "{result}").context("writing result")?;
        output.flush().context("writing result")?;
    }
    Ok(())
}

fn cmd_info() {
    println!("cdcrelay v{}", env!("CARGO_PKG_VERSION"));
    match RelayConfig::from_env() {
        Ok(cfg) => {
            println!("  Region:          {}", cfg.common.region);
            println!("  Topic:           {}", cfg.topic_arn);
            println!("  Bus endpoint:    {}", cfg.bus_endpoint);
            println!("  Log level:       {}", cfg.common.log_level);
            println!(
                "  Concurrency cap: {}",
                cfg.common
                    .runner
                    .max_concurrency
                    .map_or("batch size".to_string(), |n| n.to_string())
            );
        }
        Err(e) => println!("  Relay configuration incomplete: {e}"),
    }
    if let Err(e) = ConsumerConfig::from_env() {
        println!("  Consumer configuration incomplete: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn relay_env() -> impl Fn(&str) -> Option<String> {
        env(&[
            ("AWS_REGION", "eu-west-1"),
            ("PUBLISH_TOPIC_ARN", "arn:aws:sns:eu-west-1:123456789012:cdc"),
            ("BUS_ENDPOINT", "memory"),
            ("LOG_LEVEL", "debug"),
        ])
    }

    fn stream_line(ids: &[&str]) -> String {
        let records: Vec<Value> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                json!({
                    "eventID": id,
                    "eventName": "INSERT",
                    "dynamodb": {"NewImage": {"PK": format!("user#{i}")}, "SequenceNumber": format!("{i}00")}
                })
            })
            .collect();
        json!({ "Records": records }).to_string()
    }

    async fn run(stage: Stage, lookup: impl Fn(&str) -> Option<String>, input: String) -> Vec<Value> {
        let mut output = Vec::new();
        let run = run_stage(stage, lookup, || Ok(Cursor::new(input)), &mut output);
        tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("stage did not finish")
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).expect("every output line is JSON"))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn relay_writes_one_report_per_line() {
        let input = format!("{}\n\n{}\n", stream_line(&["e1", "e2"]), stream_line(&["e3"]));
        let out = run(Stage::Relay, relay_env(), input).await;
        assert_eq!(out, vec![json!({"batchItemFailures": []}), json!({"batchItemFailures": []})]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn invalid_line_does_not_stop_processing() {
        let input = format!("this is not a batch\n{}\n", stream_line(&["e1"]));
        let out = run(Stage::Relay, relay_env(), input).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["errorType"], "InvalidPayload");
        assert!(out[0]["errorMessage"].is_string());
        assert_eq!(out[1], json!({"batchItemFailures": []}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn record_tasks_logging_at_debug_do_not_block_output() {
        let records: Vec<Value> = (0..16)
            .map(|i| json!({"eventID": format!("e{i}"), "eventName": "MODIFY", "dynamodb": {"NewImage": {"PK": format!("k{i}")}}}))
            .collect();
        let batch = json!({ "Records": records }).to_string();
        let input = format!("{batch}\n{batch}\n{batch}\n");

        let out = run(Stage::Relay, relay_env(), input).await;
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|r| r == &json!({"batchItemFailures": []})));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn consumer_reports_undecodable_messages() {
        let inner = json!({"eventID": "e1", "eventName": "INSERT", "dynamodb": {"NewImage": {"PK": "user#42"}}});
        let good = json!({"Type": "Notification", "Subject": "INSERT-e1", "Message": inner.to_string()});
        let line = json!({"Records": [
            {"messageId": "m1", "body": good.to_string()},
            {"messageId": "m2", "body": "not json"}
        ]})
        .to_string();

        let lookup = env(&[("AWS_REGION", "eu-west-1"), ("LOG_LEVEL", "debug")]);
        let out = run(Stage::Consume, lookup, format!("{line}\n")).await;
        assert_eq!(out, vec![json!({"batchItemFailures": [{"itemIdentifier": "m2"}]})]);
    }

    #[tokio::test]
    async fn config_error_aborts_before_reading_input() {
        let opened = AtomicBool::new(false);
        let mut output = Vec::new();
        let lookup = env(&[("AWS_REGION", "eu-west-1"), ("PUBLISH_TOPIC_ARN", "arn:t")]);

        let result = run_stage(
            Stage::Relay,
            lookup,
            || {
                opened.store(true, Ordering::SeqCst);
                Ok(Cursor::new(String::new()))
            },
            &mut output,
        )
        .await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("BUS_ENDPOINT"));
        assert!(!opened.load(Ordering::SeqCst));
        assert!(output.is_empty());
    }
}
