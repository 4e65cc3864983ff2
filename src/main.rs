use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};

use consult_report::config::{MailboxConfig, NotifyConfig, ServiceConfig};
use consult_report::jobs::events::wire_lines;
use consult_report::jobs::ws::job_routes;
use consult_report::jobs::{JobConfig, JobDeps, JobState, Orchestrator};
use consult_report::mailbox::{DateRange, ImapFetcher};
use consult_report::notify::{Notifier, SmtpNotifier};
use consult_report::pipeline::FilterConfig;
use consult_report::report::CsvReportWriter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let service_config = ServiceConfig::from_env();

    let mailbox_config = match MailboxConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  export CONSULT_IMAP_HOST=imap.gmail.com");
            eprintln!("  export CONSULT_IMAP_USERNAME=you@gmail.com");
            eprintln!("  export CONSULT_IMAP_PASSWORD=<app password>");
            std::process::exit(1);
        }
    };

    let notifier: Option<Arc<dyn Notifier>> = match NotifyConfig::from_env() {
        Some(config) => {
            eprintln!("   Notifications: enabled (SMTP: {})", config.smtp_host);
            Some(Arc::new(SmtpNotifier::new(config)))
        }
        None => {
            eprintln!("   Notifications: disabled");
            None
        }
    };

    let deps = JobDeps {
        fetcher: Arc::new(ImapFetcher::new(mailbox_config.clone())),
        serializer: Arc::new(CsvReportWriter::new(service_config.report_dir.clone())),
        notifier,
        owner_address: mailbox_config.owner_address.clone(),
    };
    let orchestrator = Orchestrator::new(deps, &service_config);

    // One-shot mode: `consult-report --once [start end]` runs a single job
    // and streams its output to stdout in the plain-text wire format.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().is_some_and(|a| a == "--once") {
        let range = parse_range(&args[1..])?;
        return run_once(orchestrator, range).await;
    }

    eprintln!("📋 Consult Report v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {} on {}", mailbox_config.username, mailbox_config.imap_host);
    eprintln!("   Reports: {}", service_config.report_dir.display());
    eprintln!(
        "   Job API: http://0.0.0.0:{}/api/jobs",
        service_config.http_port
    );
    eprintln!(
        "   Job WS:  ws://0.0.0.0:{}/api/jobs/{{id}}/ws\n",
        service_config.http_port
    );

    let app = job_routes(orchestrator);
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", service_config.http_port)).await?;
    tracing::info!(port = service_config.http_port, "Job server started");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Parse `[start end]` dates (YYYY-MM-DD); no dates means the last 30 days.
fn parse_range(args: &[String]) -> anyhow::Result<DateRange> {
    match args {
        [] => {
            let end = Utc::now().date_naive();
            let start = end.checked_sub_days(Days::new(30)).unwrap_or(end);
            eprintln!("   No date range specified, using last 30 days");
            Ok(DateRange::new(start, end))
        }
        [start, end] => {
            let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")?;
            let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")?;
            Ok(DateRange::new(start, end))
        }
        _ => anyhow::bail!("usage: consult-report --once [<start> <end>] (dates as YYYY-MM-DD)"),
    }
}

/// Submit one job, stream its events to stdout, exit by terminal state.
async fn run_once(orchestrator: Arc<Orchestrator>, range: DateRange) -> anyhow::Result<()> {
    let job_id = orchestrator.submit(JobConfig {
        date_range: range,
        filter: FilterConfig::default(),
    });
    let mut rx = orchestrator.subscribe(job_id)?;

    loop {
        match rx.recv().await {
            Ok(event) => {
                for line in wire_lines(&event) {
                    println!("{line}");
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("   (skipped {n} events)");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    let job = orchestrator.status(job_id)?;
    match job.state {
        JobState::Completed => {
            eprintln!(
                "Completed: {} rows{}",
                job.result_count.unwrap_or(0),
                job.artifact
                    .as_deref()
                    .map(|p| format!(" → {p}"))
                    .unwrap_or_default()
            );
            Ok(())
        }
        _ => {
            eprintln!(
                "Failed: {}",
                job.error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
    }
}
