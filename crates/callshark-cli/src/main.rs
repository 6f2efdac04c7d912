use std::fs;
use std::io::BufRead;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use callshark_core::{
    ChannelSource, LineSource, LocalAddrs, Monitor, MonitorConfig, MonitorError, ReaderSource, Scoreboard,
    SessionOutcome, SessionReport, make_session_report,
};
use clap::{Args, Parser, Subcommand};
use glob::glob;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const EXAMPLES: &str = "Examples:\n  callshark monitor --interface eth0 -o report.json\n  callshark monitor --input capture.txt --local-addr 192.168.1.20 --stdout\n  tshark -i eth0 -f 'udp or tcp' | callshark monitor --input - --stdout";

/// Lines buffered between the stdin reader thread and the session.
const STDIN_BUFFER_LINES: usize = 1024;
/// How long a capture program may take to exit once its output has ended.
const CAPTURE_EXIT_GRACE: Duration = Duration::from_secs(2);

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("CALLSHARK_BUILD_COMMIT_FULL"),
    "\nbuilt: ",
    env!("CALLSHARK_BUILD_DATE"),
);

#[derive(Parser, Debug)]
#[command(name = "callshark")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CALLSHARK_BUILD_COMMIT"), ")"))]
#[command(long_version = LONG_VERSION)]
#[command(
    about = "Passive call-quality monitor: rates the dominant audio/video streams of a live call from capture output.",
    long_about = None,
    after_help = EXAMPLES
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover the call's streams and rate them window by window.
    #[command(after_help = EXAMPLES)]
    Monitor(MonitorArgs),
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Capture live on this interface with tshark
    #[arg(short = 'i', long, required_unless_present = "input", conflicts_with = "input")]
    interface: Option<String>,

    /// Capture program used with --interface
    #[arg(long, default_value = "tshark", requires = "interface")]
    tshark: PathBuf,

    /// Replay capture text from a file ('-' reads stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Address of this host (repeatable; detected from interfaces when omitted)
    #[arg(long = "local-addr", value_name = "IP")]
    local_addrs: Vec<IpAddr>,

    /// Aggregation window in seconds
    #[arg(long, default_value_t = 2.0)]
    window_secs: f64,

    /// Packets examined before choosing the call's streams
    #[arg(long, default_value_t = 2000)]
    discovery_packets: u64,

    /// Rate (kbit/s) at or below which a tracked stream may be replaced
    #[arg(long, default_value_t = 50.0)]
    floor_kbps: f64,

    /// Listen on localhost:PORT for a "Stop" message ending the session
    #[arg(long, value_name = "PORT")]
    stop_port: Option<u16>,

    /// Output report path (JSON)
    #[arg(short = 'o', long)]
    report: Option<PathBuf>,

    /// Write JSON report to stdout
    #[arg(long, conflicts_with = "report")]
    stdout: bool,

    /// Pretty-print JSON output
    #[arg(long, conflicts_with = "compact")]
    pretty: bool,

    /// Compact JSON output (default)
    #[arg(long)]
    compact: bool,

    /// Suppress non-error output
    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log window and discovery details
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Monitor(args) => {
            init_logging(args.verbose, args.quiet);
            cmd_monitor(args).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{err:#}"), None)
    }
}

impl From<MonitorError> for CliError {
    fn from(err: MonitorError) -> Self {
        let hint = match &err {
            MonitorError::Config(_) => {
                Some("check --window-secs, --discovery-packets and --floor-kbps".to_string())
            }
            MonitorError::Source(_) => Some("the capture stream could not be read".to_string()),
            MonitorError::Worker(_) => None,
        };
        CliError::new(err.to_string(), hint)
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

enum Input {
    Capture { program: PathBuf, interface: String },
    File(PathBuf),
    Stdin,
}

async fn cmd_monitor(args: MonitorArgs) -> Result<(), CliError> {
    let input = match (&args.interface, &args.input) {
        (Some(interface), _) => Input::Capture {
            program: args.tshark.clone(),
            interface: interface.clone(),
        },
        (None, Some(path)) if path.as_os_str() == "-" => Input::Stdin,
        (None, Some(path)) => {
            let resolved = resolve_input_path(path)?;
            validate_input_file(&resolved)?;
            Input::File(resolved)
        }
        (None, None) => {
            return Err(CliError::new(
                "missing capture input",
                Some("use --interface or --input".to_string()),
            ));
        }
    };
    if let (Input::File(input_path), Some(report_path)) = (&input, args.report.as_ref()) {
        ensure_distinct_paths(input_path, report_path)?;
    }

    let config = monitor_config(&args)?;
    let local = resolve_local_addrs(&args.local_addrs)?;
    let monitor = Monitor::new(config, local)?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());
    if let Some(port) = args.stop_port {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .with_context(|| format!("Failed to listen for stop command on port {port}"))?;
        info!(port, "listening for stop command");
        tokio::spawn(listen_for_stop(listener, cancel.clone()));
    }
    let printer = (!args.quiet).then(|| spawn_scoreboard_printer(monitor.subscribe()));

    let outcome = match input {
        Input::Capture { program, interface } => {
            run_capture(monitor, &program, &interface, args.quiet, cancel.clone()).await
        }
        Input::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            run_session(monitor, ReaderSource::new(BufReader::new(file)), cancel.clone()).await
        }
        Input::Stdin => run_session(monitor, stdin_source(), cancel.clone()).await,
    };
    cancel.cancel();
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let outcome = outcome?;

    let report = make_session_report(&outcome);
    let json = serialize_report(&report, args.pretty, args.compact)?;
    if args.stdout {
        println!("{}", json);
    } else if let Some(path) = args.report.as_ref() {
        write_report(path, &json)?;
        if !args.quiet {
            eprintln!("OK: report written -> {}", path.display());
        }
    }

    match outcome {
        SessionOutcome::NoCall(discovered) => Err(CliError::new(
            format!(
                "no call streams found after {} classified packets",
                discovered.packets_classified
            ),
            Some(
                "check --local-addr, or raise --discovery-packets if the call starts late"
                    .to_string(),
            ),
        )),
        SessionOutcome::Completed(summary) => {
            if !args.quiet {
                match summary.history.mean_quality() {
                    Some(mean) => eprintln!(
                        "OK: {} windows scored, mean quality {:.1}/10",
                        summary.windows_scored, mean
                    ),
                    None => eprintln!("OK: call ended before a full window was scored"),
                }
            }
            Ok(())
        }
    }
}

fn monitor_config(args: &MonitorArgs) -> Result<MonitorConfig, CliError> {
    let window = Duration::try_from_secs_f64(args.window_secs).map_err(|_| {
        CliError::new(
            format!("invalid window length '{}'", args.window_secs),
            Some("use a positive number of seconds".to_string()),
        )
    })?;
    Ok(MonitorConfig {
        window,
        discovery_packets: args.discovery_packets,
        failover_floor_bps: args.floor_kbps * 1000.0,
        ..MonitorConfig::default()
    })
}

fn resolve_local_addrs(explicit: &[IpAddr]) -> Result<LocalAddrs, CliError> {
    if !explicit.is_empty() {
        return Ok(LocalAddrs::new(explicit.iter().copied()));
    }
    let interfaces = local_ip_address::list_afinet_netifas().map_err(|err| {
        CliError::new(
            format!("failed to enumerate local addresses: {err}"),
            Some("pass --local-addr explicitly".to_string()),
        )
    })?;
    let local = LocalAddrs::new(interfaces.into_iter().map(|(_, addr)| addr));
    debug!(count = local.len(), "detected local addresses");
    Ok(local)
}

async fn run_session<S>(
    monitor: Monitor,
    source: S,
    cancel: CancellationToken,
) -> Result<SessionOutcome, CliError>
where
    S: LineSource + Send + 'static,
{
    monitor.run(source, cancel).await.map_err(Into::into)
}

async fn run_capture(
    monitor: Monitor,
    program: &Path,
    interface: &str,
    quiet: bool,
    cancel: CancellationToken,
) -> Result<SessionOutcome, CliError> {
    let mut child = Command::new(program)
        .args(["-i", interface, "-f", "udp or tcp"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if quiet { Stdio::null() } else { Stdio::inherit() })
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            CliError::new(
                format!("failed to start capture program '{}': {err}", program.display()),
                Some("install tshark or point --tshark at it".to_string()),
            )
        })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CliError::new("capture program has no stdout", None))?;
    info!(interface, program = %program.display(), "capture started");

    let outcome =
        run_session(monitor, ReaderSource::new(BufReader::new(stdout)), cancel.clone()).await;

    // Output ended on its own: the program exited or is about to.
    let status = if cancel.is_cancelled() {
        None
    } else {
        match tokio::time::timeout(CAPTURE_EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                debug!(error = %err, "cannot collect capture program status");
                None
            }
            Err(_) => None,
        }
    };
    match status {
        Some(status) if !status.success() => {
            if matches!(outcome, Ok(SessionOutcome::NoCall(_))) {
                return Err(CliError::new(
                    format!("capture program '{}' failed ({status})", program.display()),
                    Some("check the interface name and capture permissions".to_string()),
                ));
            }
            warn!(%status, "capture program exited with an error");
        }
        Some(_) => {}
        None => {
            if let Err(err) = child.kill().await {
                debug!(error = %err, "capture program already exited");
            }
        }
    }
    outcome
}

/// Read stdin on a plain thread feeding a channel. A read blocked on an idle
/// pipe then never holds up shutdown.
fn stdin_source() -> ChannelSource {
    let (tx, source) = ChannelSource::channel(STDIN_BUFFER_LINES);
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match stdin.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "stdin read failed, treating as end of input");
                    break;
                }
            }
        }
    });
    source
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("interrupted, finishing session");
                    cancel.cancel();
                }
                Err(err) => warn!(error = %err, "cannot listen for Ctrl-C"),
            },
        }
    });
}

async fn listen_for_stop(listener: TcpListener, cancel: CancellationToken) {
    let mut buf = [0u8; 1024];
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let (mut conn, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "stop listener accept failed");
                continue;
            }
        };
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = conn.read(&mut buf) => read,
        };
        match read {
            Ok(n) if String::from_utf8_lossy(&buf[..n]).trim() == "Stop" => {
                info!(%peer, "stop command received");
                cancel.cancel();
                return;
            }
            Ok(_) => debug!(%peer, "ignoring unknown control message"),
            Err(err) => debug!(%peer, error = %err, "control connection failed"),
        }
    }
}

fn spawn_scoreboard_printer(mut results: watch::Receiver<Scoreboard>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while results.changed().await.is_ok() {
            let board = results.borrow_and_update().clone();
            print_scoreboard(&board);
        }
    })
}

fn print_scoreboard(board: &Scoreboard) {
    eprintln!("window {}:", board.sequence);
    if board.is_empty() {
        eprintln!("  (no traffic on tracked streams)");
        return;
    }
    for entry in &board.flows {
        let m = &entry.metrics;
        eprintln!(
            "  {}  {:>9.0} bps  jitter {:>6.1} ms  latency {:>6.1} ms  quality {:>2}/10",
            entry.flow, m.bitrate_bps, m.jitter_ms, m.latency_ms, m.quality
        );
    }
}

fn serialize_report(rep: &SessionReport, pretty: bool, compact: bool) -> Result<String, CliError> {
    if pretty && compact {
        return Err(CliError::new(
            "cannot use --pretty and --compact together",
            Some("choose one output format".to_string()),
        ));
    }
    if pretty {
        serde_json::to_string_pretty(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    } else {
        serde_json::to_string(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    }
}

fn write_report(path: &Path, json: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }
    fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(())
}

fn ensure_distinct_paths(input: &Path, report: &Path) -> Result<(), CliError> {
    let input_abs = fs::canonicalize(input)
        .with_context(|| format!("Failed to resolve input path: {}", input.display()))?;
    let Some(file_name) = report.file_name() else {
        return Err(CliError::new(
            format!("invalid report path: {}", report.display()),
            Some("pass a file name to -o/--report".to_string()),
        ));
    };
    let parent = match report.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    // A report directory that does not exist yet cannot contain the input.
    let Ok(report_dir) = fs::canonicalize(parent) else {
        return Ok(());
    };
    if report_dir.join(file_name) == input_abs {
        return Err(CliError::new(
            format!("report path must differ from input: {}", report.display()),
            Some("choose a different output path".to_string()),
        ));
    }
    Ok(())
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("pass capture text written by tshark, or '-' for stdin".to_string()),
        ));
    }
    if !input.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", input.display()),
            Some("pass capture text written by tshark, or '-' for stdin".to_string()),
        ));
    }
    Ok(())
}

fn resolve_input_path(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(input.to_path_buf());
    }

    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    let mut matches = Vec::new();
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    match matches.len() {
        0 => Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern".to_string()),
        )),
        1 => Ok(matches.remove(0)),
        count => {
            let mut listed = matches
                .iter()
                .take(3)
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if count > 3 {
                listed.push_str(", ...");
            }
            Err(CliError::new(
                format!(
                    "multiple files match pattern '{pattern}' ({count} matches); matches: {listed}"
                ),
                Some("pass a single capture file, or run once per file".to_string()),
            ))
        }
    }
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
