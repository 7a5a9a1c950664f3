use clap::Parser;
use env_logger::Env;
use log::*;
use regsnipe::{
    auth::ObsLogin,
    clock::{HttpAuthority, SystemClock},
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    registration::RegistrationResponse,
    report,
    schedule::{ExecutionMode, FireReport, SchedulePlan, Scheduler},
    transport::{self, ObsTransport},
};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "regsnipe")]
#[command(about = "Fires a course registration request at a server-synchronized instant", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "REGSNIPE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    /// Verbose logs, including credential details
    #[arg(long)]
    logs: bool,
    /// Send the request immediately instead of waiting for the deadline
    #[arg(long)]
    test: bool,
    /// Trust the local clock and skip server synchronization
    #[arg(long)]
    local: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_filter = if cli.logs { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = AppConfig::from_file(&cli.config)
        .map_err(|e| format!("[Fatal] configuration {}: {e}", cli.config))?;
    let target = config.target().map_err(|e| format!("[Fatal] {e}"))?;
    let mode = ExecutionMode {
        debug: cli.logs,
        test: cli.test,
        local: cli.local,
    };
    let payload = config
        .registration()
        .to_bytes()
        .map_err(|e| format!("[Fatal] payload: {e}"))?;
    info!("[JSON] Adding: {:?}", config.courses.crn);
    info!("[JSON] Dropping: {:?}", config.courses.scrn);

    // probes and the fire share one connection pool
    let client = transport::shared_client()
        .map_err(|e| format!("[Fatal] could not set up the HTTP client: {e}"))?;
    let authority = HttpAuthority::new(client.clone(), config.clock.authority_url.as_str());
    let login = ObsLogin::new(&config.service.base_url).map_err(|e| format!("[Fatal] {e}"))?;
    let transport = ObsTransport::new(client, &config.service.base_url)
        .map_err(|e| format!("[Fatal] {e}"))?;

    info!("[System] Target {} ({})", config.time, target);
    let plan = SchedulePlan::new(target, &config.clock);
    let mut scheduler = Scheduler::new(SystemClock, authority, login, transport, plan, mode);
    let report = scheduler
        .run(&config.account.username, &config.account.password, &payload)
        .await
        .map_err(|e| format!("[Critical] {e}"))?;

    print_results(&report, mode.debug);
    if let Some(path) = &config.service.report_path {
        match report::to_csv(&report, path) {
            Ok(()) => info!("Timing report written to {path}"),
            Err(e) => warn!("Failed to write timing report {path}: {e}"),
        }
    }
    Ok(())
}

fn print_results(report: &FireReport, verbose: bool) {
    info!(
        "[Result] Fired at {} local, {} estimated server time (offset {}ms)",
        report.fired_at.format("%H:%M:%S%.3f"),
        report.authority_fired_at.format("%H:%M:%S%.3f"),
        report.offset.value_ms
    );
    let body = report.response.body_text();
    if verbose {
        debug!("[Debug] Raw response:\n{body}");
    }
    match RegistrationResponse::parse(&report.response.body) {
        Ok(results) => {
            println!("\n--- Registration Results ---");
            for result in &results.ecrn_result_list {
                println!("{}", result.message());
            }
            if !results.scrn_result_list.is_empty() {
                println!("--- Drop Results ---");
                for result in &results.scrn_result_list {
                    println!("{}", result.message());
                }
            }
        }
        Err(e) => {
            warn!("[Error] Failed to parse response JSON: {e}");
            warn!("Raw response:\n{body}");
        }
    }
}
