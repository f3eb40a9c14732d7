use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use oxlink::{DiagramEditor, EditScript, EditorConfig, GraphModel, ReplayReport, Snapshot};

const LOG_ENV: &str = "OXLINK_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
enum InputSource {
    Stdin,
    File(PathBuf),
}

#[derive(Debug, Clone)]
enum OutputDestination {
    Stdout,
    File(PathBuf),
}

#[derive(Debug, Parser)]
#[command(
    name = "oxlink",
    about = "Replay edit scripts against diagram snapshots and inspect port occupancy."
)]
pub struct Cli {
    /// Editor configuration (JSON). Without it the defaults apply, overlaid with OXLINK_* variables.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Apply an edit script to a snapshot and optionally write the result.
    Replay(ReplayArgs),
    /// Summarize a snapshot: cell counts and port occupancy.
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// Snapshot to start from. Use '-' to read from stdin; omit to start empty.
    #[arg(short = 's', long = "snapshot")]
    snapshot: Option<String>,

    /// Edit script to replay.
    #[arg(short = 'x', long = "script")]
    script: PathBuf,

    /// Where to write the resulting snapshot. Use '-' to write to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Stop at the first failing step instead of skipping it.
    #[arg(long = "stop-on-error", action = ArgAction::SetTrue)]
    stop_on_error: bool,

    /// Format of the step report.
    #[arg(long = "report", value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,

    /// Suppress the step report.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    /// Snapshot to inspect. Use '-' to read from stdin.
    #[arg(short = 's', long = "snapshot")]
    snapshot: String,

    /// Print the summary as JSON.
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

pub fn dispatch() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        CliCommand::Replay(args) => run_replay(args, config),
        CliCommand::Inspect(args) => run_inspect(args, config),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<EditorConfig> {
    match path {
        Some(path) => EditorConfig::load(path),
        None => Ok(EditorConfig::from_env()),
    }
}

fn run_replay(args: ReplayArgs, config: EditorConfig) -> Result<()> {
    let mut editor = match args.snapshot.as_deref() {
        Some(snapshot) => {
            let snapshot = load_snapshot(&parse_input(snapshot)?)?;
            DiagramEditor::from_snapshot(&snapshot, config)
                .context("snapshot is not a consistent diagram")?
        }
        None => DiagramEditor::with_config(config),
    };

    let script = EditScript::read_from(&args.script)?;
    let report = script.replay(&mut editor, args.stop_on_error);
    editor.commit();

    let output = args.output.as_deref().map(parse_output);
    if let Some(dest) = &output {
        let json = editor
            .snapshot()
            .to_json()
            .context("failed to serialize the resulting snapshot")?;
        write_output(dest, json.as_bytes())?;
    }

    if !args.quiet {
        let rendered = render_report(&report, args.report)?;
        // keep stdout clean when the snapshot itself goes there
        if matches!(output, Some(OutputDestination::Stdout)) {
            eprint!("{rendered}");
        } else {
            print!("{rendered}");
        }
    }

    let failures = report.failures();
    if failures > 0 {
        bail!("{failures} of {} script steps failed", report.steps.len());
    }
    Ok(())
}

fn render_report(report: &ReplayReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => {
            let mut json = serde_json::to_string_pretty(report)?;
            json.push('\n');
            Ok(json)
        }
        ReportFormat::Text => {
            let mut text = String::new();
            for step in &report.steps {
                let status = if step.ok { "ok" } else { "FAILED" };
                text.push_str(&format!(
                    "[{:>3}] {:<13} {:<6} {}\n",
                    step.index, step.op, status, step.message
                ));
            }
            text.push_str(&format!(
                "{} steps, {} failed\n",
                report.steps.len(),
                report.failures()
            ));
            Ok(text)
        }
    }
}

fn run_inspect(args: InspectArgs, config: EditorConfig) -> Result<()> {
    let snapshot = load_snapshot(&parse_input(&args.snapshot)?)?;
    let editor = DiagramEditor::from_snapshot(&snapshot, config)
        .context("snapshot is not a consistent diagram")?;
    let graph = editor.graph();
    let ports = editor.ports();

    if args.json {
        let shapes: Vec<serde_json::Value> = graph
            .elements()
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "ports": ports.ports(id).len(),
                    "free": ports.free_ports(id).len(),
                })
            })
            .collect();
        let claims: Vec<serde_json::Value> = ports
            .claims()
            .into_iter()
            .map(|(shape, port, link)| serde_json::json!({"shape": shape, "port": port, "link": link}))
            .collect();
        let summary = serde_json::json!({
            "elements": graph.element_count(),
            "links": graph.link_count(),
            "shapes": shapes,
            "claims": claims,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Elements: {}", graph.element_count());
    println!("Links: {}", graph.link_count());
    for id in graph.elements() {
        println!(
            "  {id}: {} ports, {} free",
            ports.ports(&id).len(),
            ports.free_ports(&id).len()
        );
    }
    let claims = ports.claims();
    if !claims.is_empty() {
        println!("Occupied ports:");
        for (shape, port, link) in claims {
            println!("  {shape}/{port} -> {link}");
        }
    }
    Ok(())
}

fn parse_input(input: &str) -> Result<InputSource> {
    match input {
        "-" => Ok(InputSource::Stdin),
        path_str => {
            let path = PathBuf::from(path_str);
            if !path.exists() {
                return Err(anyhow!("input file '{path_str}' does not exist"));
            }
            Ok(InputSource::File(path))
        }
    }
}

fn parse_output(output: &str) -> OutputDestination {
    match output {
        "-" => OutputDestination::Stdout,
        path => OutputDestination::File(PathBuf::from(path)),
    }
}

fn load_snapshot(source: &InputSource) -> Result<Snapshot> {
    match source {
        InputSource::Stdin => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            if buffer.trim().is_empty() {
                return Err(anyhow!("no snapshot supplied on stdin"));
            }
            Snapshot::from_json(&buffer).context("failed to parse snapshot from stdin")
        }
        InputSource::File(path) => Snapshot::read_from(path),
    }
}

fn write_output(dest: &OutputDestination, bytes: &[u8]) -> Result<()> {
    match dest {
        OutputDestination::Stdout => {
            let mut stdout = io::stdout();
            stdout.write_all(bytes)?;
            stdout.write_all(b"\n")?;
            stdout.flush()?;
        }
        OutputDestination::File(path) => {
            fs::write(path, bytes)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
        }
    }
    Ok(())
}
