// src/bin/upstream_guard_cli.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use upstream_guard::config::{ProxyConfig, ServicePolicy};
use upstream_guard::proxy::ProxyEndpoint;
use upstream_guard::{
    redact, with_limit, BudgetTracker, GuardConfig, GuardError, HttpRequest, ProxyManager,
    RetryingFetch, RotationMode, SlidingWindowLimiter,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "upstream_guard_cli",
    about = "Exercise the outbound call guards from the command line"
)]
struct Opt {
    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences), global = true)]
    verbose: usize,

    /// Disable logs
    #[structopt(long, global = true)]
    disable_logs: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Simulate traffic against the sliding window limiter
    Limiter {
        /// Key to use for rate limiting
        #[structopt(short, long, default_value = "203.0.113.7")]
        key: String,

        /// Maximum number of requests allowed per window
        #[structopt(short, long, default_value = "10")]
        limit: u64,

        /// Window duration in milliseconds
        #[structopt(short, long, default_value = "1000")]
        window_ms: u64,

        /// Simulation mode
        #[structopt(long, possible_values = &["burst", "steady"], default_value = "burst")]
        simulation: String,

        /// Number of requests to simulate
        #[structopt(short = "n", long, default_value = "20")]
        num_requests: usize,

        /// Time between requests in milliseconds (steady mode)
        #[structopt(short = "t", long, default_value = "100")]
        request_interval_ms: u64,
    },

    /// Spend a service budget until its breaker opens
    Budget {
        #[structopt(short, long, default_value = "demo")]
        service: String,

        #[structopt(short, long, default_value = "3")]
        max_calls: u32,

        #[structopt(short, long, default_value = "1000")]
        window_ms: u64,

        /// Number of spend attempts
        #[structopt(short = "n", long, default_value = "5")]
        attempts: usize,

        /// Pause between attempts in milliseconds
        #[structopt(short = "t", long, default_value = "0")]
        interval_ms: u64,
    },

    /// Trace proxy rotation; connection strings are printed redacted
    Proxy {
        /// Comma separated host:port list
        #[structopt(short, long, default_value = "10.0.0.1:8001,10.0.0.2:8002,10.0.0.3:8003")]
        endpoints: String,

        #[structopt(long, possible_values = &["per-request", "per-session"], default_value = "per-request")]
        mode: String,

        /// Session key for per-session rotation
        #[structopt(long)]
        session: Option<String>,

        /// Endpoints (host:port) to mark failed before rotating
        #[structopt(long)]
        fail: Vec<String>,

        #[structopt(short = "n", long, default_value = "6")]
        selections: usize,
    },

    /// Fetch a URL many times through the concurrency limiter and retrying fetch
    Fanout {
        url: String,

        #[structopt(short = "n", long, default_value = "20")]
        requests: usize,

        #[structopt(short, long, default_value = "4")]
        concurrency: usize,

        #[structopt(long, default_value = "2")]
        retries: usize,

        #[structopt(long, default_value = "8000")]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match (opt.disable_logs, opt.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "upstream_guard_cli={},upstream_guard={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match opt.command {
        Command::Limiter {
            key,
            limit,
            window_ms,
            simulation,
            num_requests,
            request_interval_ms,
        } => {
            let limiter = SlidingWindowLimiter::default();
            let window = Duration::from_millis(window_ms);
            match simulation.as_str() {
                "steady" => {
                    let interval = Duration::from_millis(request_interval_ms);
                    simulate_steady(&limiter, &key, limit, window, num_requests, interval).await?
                }
                _ => simulate_burst(&limiter, &key, limit, window, num_requests).await,
            }
        }
        Command::Budget {
            service,
            max_calls,
            window_ms,
            attempts,
            interval_ms,
        } => {
            let policy = ServicePolicy::new(max_calls, Duration::from_millis(window_ms), service.clone());
            let budgets = BudgetTracker::new(GuardConfig::defaults().budgets).with_policy(service.clone(), policy);
            spend_budget(&budgets, &service, attempts, Duration::from_millis(interval_ms)).await;
        }
        Command::Proxy {
            endpoints,
            mode,
            session,
            fail,
            selections,
        } => {
            let mode: RotationMode = mode.parse()?;
            trace_rotation(&endpoints, mode, session.as_deref(), &fail, selections).await?;
        }
        Command::Fanout {
            url,
            requests,
            concurrency,
            retries,
            timeout_ms,
        } => {
            fan_out(&url, requests, concurrency, retries, Duration::from_millis(timeout_ms)).await?;
        }
    }

    Ok(())
}

// All requests at once
async fn simulate_burst(limiter: &SlidingWindowLimiter, key: &str, limit: u64, window: Duration, num_requests: usize) {
    info!(key, num_requests, "Simulating burst");

    let mut table = Table::new();
    table.add_row(row!["#", "Result", "Remaining", "Retry after"]);

    let start_time = Instant::now();
    let mut allowed_count = 0;

    for i in 0..num_requests {
        let status = limiter.check(key, limit, window).await;
        if status.allowed {
            allowed_count += 1;
        }
        table.add_row(row![
            i + 1,
            if status.allowed { "ALLOWED" } else { "DENIED" },
            status.remaining,
            format!("{:?}", status.retry_after)
        ]);
    }

    table.printstd();
    print_summary("Burst", num_requests, allowed_count, start_time.elapsed());
}

// Fixed intervals; Ctrl-C stops early and still prints the summary
async fn simulate_steady(
    limiter: &SlidingWindowLimiter,
    key: &str,
    limit: u64,
    window: Duration,
    num_requests: usize,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(key, num_requests, interval_ms = interval.as_millis() as u64, "Simulating steady stream");

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst))?;

    let start_time = Instant::now();
    let mut sent = 0;
    let mut allowed_count = 0;

    for i in 0..num_requests {
        if stop.load(Ordering::SeqCst) {
            warn!(sent, "Interrupted, stopping simulation");
            break;
        }

        let request_time = Instant::now();
        let status = limiter.check(key, limit, window).await;
        sent += 1;

        if status.allowed {
            allowed_count += 1;
            info!("Request {}: ALLOWED (remaining: {})", i + 1, status.remaining);
        } else {
            warn!("Request {}: DENIED (retry after: {:?})", i + 1, status.retry_after);
        }

        let elapsed = request_time.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }

    print_summary("Steady", sent, allowed_count, start_time.elapsed());
    Ok(())
}

fn print_summary(name: &str, total: usize, allowed: usize, elapsed: Duration) {
    let mut table = Table::new();
    table.add_row(row![format!("{} simulation", name), ""]);
    table.add_row(row!["Total requests", total]);
    table.add_row(row!["Allowed", allowed]);
    table.add_row(row!["Denied", total - allowed]);
    table.add_row(row!["Time elapsed", format!("{:?}", elapsed)]);
    table.printstd();
}

async fn spend_budget(budgets: &BudgetTracker, service: &str, attempts: usize, interval: Duration) {
    let mut table = Table::new();
    table.add_row(row!["#", "Outcome", "Calls", "Breaker"]);

    for i in 0..attempts {
        let outcome = match budgets.spend(service).await {
            Ok(()) => "spent".to_string(),
            Err(GuardError::BudgetExceeded { retry_after, .. }) => {
                format!("rejected, retry after {:?}", retry_after)
            }
            Err(e) => format!("error: {}", e),
        };

        let (calls, breaker) = match budgets.usage(service).await {
            Some(usage) => (usage.calls, if usage.tripped { "open" } else { "closed" }),
            None => (0, "untracked"),
        };
        table.add_row(row![i + 1, outcome, calls, breaker]);

        if !interval.is_zero() {
            time::sleep(interval).await;
        }
    }

    table.printstd();
}

async fn trace_rotation(
    endpoints: &str,
    mode: RotationMode,
    session: Option<&str>,
    fail: &[String],
    selections: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let endpoints = endpoints
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse::<ProxyEndpoint>)
        .collect::<Result<Vec<_>, _>>()?;

    // Placeholder credentials; rotation only needs proxying to be enabled
    let manager = ProxyManager::new(ProxyConfig {
        username: Some("cli".to_string()),
        password: Some("cli-secret".to_string()),
        endpoints,
        ..ProxyConfig::default()
    });

    for endpoint in fail {
        manager.mark_failed(endpoint).await;
    }

    let mut table = Table::new();
    table.add_row(row!["#", "Endpoint", "Connection"]);
    for i in 0..selections {
        match manager.select_endpoint(session, mode).await {
            Some(selection) => {
                table.add_row(row![i + 1, selection.endpoint(), redact(selection.connection_string())])
            }
            None => table.add_row(row![i + 1, "direct", "-"]),
        };
    }
    table.printstd();

    if let Some(session) = session {
        println!(
            "Session {} served {} selections",
            session,
            manager.session_selections(session).await
        );
    }
    Ok(())
}

async fn fan_out(
    url: &str,
    requests: usize,
    concurrency: usize,
    retries: usize,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = GuardConfig::from_env()?;
    let fetch = RetryingFetch::new(&config.fetch)?;
    let options = fetch.default_options().with_timeout(timeout).with_retries(retries);
    let request = HttpRequest::get(url)?;
    let limiter = with_limit(concurrency);

    let pb = ProgressBar::new(requests as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}")?
            .progress_chars("#>-"),
    );

    let start_time = Instant::now();
    let calls = (0..requests).map(|_| {
        let fetch = &fetch;
        let options = &options;
        let request = &request;
        let pb = pb.clone();
        async move {
            let started = Instant::now();
            let outcome = fetch.fetch(request, options).await;
            pb.inc(1);
            (outcome.map(|response| response.status().as_u16()), started.elapsed())
        }
    });
    let results = limiter.run_all(calls).await?;
    pb.finish_with_message("done");

    let mut table = Table::new();
    table.add_row(row!["#", "Outcome", "Latency"]);
    let mut failures = 0;
    for (i, (outcome, latency)) in results.iter().enumerate() {
        let rendered = match outcome {
            Ok(status) => status.to_string(),
            Err(e) => {
                failures += 1;
                e.to_string()
            }
        };
        table.add_row(row![i + 1, rendered, format!("{:?}", latency)]);
    }
    table.printstd();

    println!(
        "{} requests, {} failed, concurrency {}, total {:?}",
        requests,
        failures,
        limiter.capacity(),
        start_time.elapsed()
    );
    Ok(())
}
