// playdeck CLI - launch and follow Ansible jobs on a dashboard backend

use std::io::{self, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use playdeck::api::{ApiClient, HttpApiClient, PlaybookInfo};
use playdeck::config::{Config, SERVER_ENV};
use playdeck::executor::{
    display_name, is_baseline_playbook, parse_extra_vars, plan_launches, BaselineConfigs,
    JobHandle, JobSupervisor, LaunchPlan, LaunchReport, PollerSettings,
};
use playdeck::output::{create_event_channel, DashError, OutputFormat, OutputWriter, TuiApp};
use playdeck::parser::parse_output;
use playdeck::plugins::{create_observer, ObserverRegistry};
use playdeck::progress::{effective_progress, estimate_progress};

#[derive(Parser)]
#[command(
    name = "playdeck",
    about = "Launch, follow and read Ansible jobs on a dashboard backend",
    version,
    author,
    disable_colored_help = true,
    term_width = 0,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors and failed jobs
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    output_format: String,

    /// Backend URL (overrides the config file and PLAYDECK_SERVER)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum Commands {
    /// List inventory hosts and their facts
    Hosts {
        /// Only hosts whose facts could be gathered
        #[arg(long)]
        valid_only: bool,
    },

    /// List the playbooks the backend offers
    Playbooks {
        /// Filter by category
        #[arg(long)]
        category: Option<String>,

        /// Filter by target OS
        #[arg(long)]
        os: Option<String>,
    },

    /// Launch playbooks and follow the resulting jobs
    Run {
        /// Playbook names or paths
        #[arg(required = true)]
        playbooks: Vec<String>,

        /// Comma-separated target hosts
        #[arg(short = 'H', long, value_delimiter = ',', required = true)]
        hosts: Vec<String>,

        /// Extra variables (key=value, value parsed as JSON when possible)
        #[arg(short = 'e', long = "extra-var")]
        extra_vars: Vec<String>,

        /// YAML file with per-host baseline settings
        #[arg(long)]
        baseline_config: Option<PathBuf>,

        /// Prompt for baseline settings missing from the file
        #[arg(long)]
        ask_baseline: bool,

        /// Print the job ids and exit without following
        #[arg(long)]
        no_wait: bool,

        #[command(flatten)]
        follow: FollowArgs,
    },

    /// Show the current state of a job
    Status {
        job_id: String,

        /// Print the parsed log
        #[arg(long)]
        show_output: bool,
    },

    /// Follow jobs that are already running
    Watch {
        #[arg(required = true)]
        job_ids: Vec<String>,

        #[command(flatten)]
        follow: FollowArgs,
    },

    /// Ask the backend to stop a job
    Cancel { job_id: String },

    /// Parse Ansible output from a file (or stdin) and print its structure
    Parse {
        /// Log file; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Estimate progress of a partial Ansible log
    Progress {
        /// Log file; reads stdin when omitted
        file: Option<PathBuf>,
    },
}

/// Options shared by `run` and `watch`
#[derive(clap::Args, Clone)]
struct FollowArgs {
    /// Full-screen live dashboard
    #[arg(long)]
    tui: bool,

    /// Print new log lines as they arrive
    #[arg(long)]
    stream: bool,

    /// Print the parsed log of each job when it finishes
    #[arg(long)]
    show_output: bool,

    /// Additional observers (json_log:<path>, timer, webhook:<url>)
    #[arg(long = "callback")]
    callbacks: Vec<String>,

    /// On Ctrl-C, also cancel unfinished jobs on the backend
    #[arg(long)]
    cancel_on_interrupt: bool,
}

/// Global switches every command needs
struct Globals {
    verbose: bool,
    quiet: bool,
    format: OutputFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    // Parse output format
    let output_format = OutputFormat::from_str(&cli.output_format).unwrap_or_else(|e| {
        eprintln!("{}. Using 'text'.", e);
        OutputFormat::Text
    });
    let globals = Globals {
        verbose: cli.verbose > 0,
        quiet: cli.quiet,
        format: output_format,
    };

    let result = match load_config(cli.config, cli.server) {
        Ok(config) => dispatch(cli.command, config, &globals).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(true) => {}
        // Some job failed; the summary already said which
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Route `tracing` output to stderr so stdout stays machine-readable
fn init_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("playdeck={}", default_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(path: Option<PathBuf>, server: Option<String>) -> Result<Config, DashError> {
    let mut config = Config::load(path.as_deref())?;
    if let Some(server) = server {
        config.server.base_url = server;
    }
    config.validate()?;
    debug!(server = %config.server.base_url, "configuration loaded");
    Ok(config)
}

/// Run one subcommand. `Ok(false)` means it completed but a job failed.
async fn dispatch(command: Commands, config: Config, globals: &Globals) -> Result<bool, DashError> {
    let output = OutputWriter::new(globals.format, globals.verbose, globals.quiet);

    match command {
        Commands::Parse { file } => {
            let log = parse_output(&read_log(file)?);
            output.print_parsed(&log);
            Ok(!log.has_failures())
        }
        Commands::Progress { file } => {
            let content = read_log(file)?;
            let progress = estimate_progress(Some(&content));
            output.print_progress(progress, &parse_output(&content));
            Ok(true)
        }
        Commands::Hosts { valid_only } => {
            let hosts = connect(&config)?.hosts().await?;
            output.print_hosts(&hosts, valid_only);
            Ok(true)
        }
        Commands::Playbooks { category, os } => {
            let playbooks: Vec<PlaybookInfo> = connect(&config)?
                .playbooks()
                .await?
                .into_iter()
                .filter(|p| matches_filter(&p.category, category.as_deref()))
                .filter(|p| matches_filter(&p.os, os.as_deref()))
                .collect();
            output.print_playbooks(&playbooks);
            Ok(true)
        }
        Commands::Status {
            job_id,
            show_output,
        } => {
            let snapshot = connect(&config)?.status(&job_id).await?;
            let progress = effective_progress(
                Some(&snapshot.output),
                snapshot.progress,
                snapshot.status.is_terminal(),
            );
            output.print_snapshot(&job_id, &snapshot, progress, show_output);
            Ok(true)
        }
        Commands::Cancel { job_id } => {
            let accepted = connect(&config)?.cancel(&job_id).await?;
            output.print_cancelled(&job_id, accepted);
            if accepted {
                Ok(true)
            } else {
                Err(DashError::Job {
                    job_id,
                    message: "the backend did not cancel the job (already finished?)".to_string(),
                })
            }
        }
        Commands::Run {
            playbooks,
            hosts,
            extra_vars,
            baseline_config,
            ask_baseline,
            no_wait,
            follow,
        } => {
            let client = connect(&config)?;
            let extra_vars = parse_extra_vars(&extra_vars).map_err(|e| {
                DashError::usage(e).with_suggestion("Use -e key=value, e.g. -e 'ports=[80,443]'")
            })?;
            let hosts = normalize_hosts(hosts)?;
            check_hosts(client.as_ref(), &hosts).await;
            let playbooks = resolve_playbooks(client.as_ref(), &playbooks).await?;

            let mut baselines = BaselineConfigs::new();
            if playbooks.iter().any(|p| is_baseline_playbook(p)) {
                if let Some(path) = baseline_config.as_ref().or(config.baseline_hosts_file.as_ref()) {
                    baselines = BaselineConfigs::load(path)?;
                }
                if ask_baseline {
                    baselines.prompt_missing(&hosts)?;
                }
            }

            let plans = plan_launches(&playbooks, &hosts, &extra_vars, &baselines)?;
            info!(jobs = plans.len(), "launching");

            if no_wait {
                let supervisor = JobSupervisor::new(
                    client,
                    PollerSettings::from(&config.polling),
                    ObserverRegistry::new(),
                );
                let report = supervisor.launch(plans).await;
                print_launch_report(globals.format, &report);
                return Ok(report.failures.is_empty());
            }

            follow_jobs(client, &config, globals, output, follow, Work::Launch(plans)).await
        }
        Commands::Watch { job_ids, follow } => {
            let handles = job_ids.into_iter().map(JobHandle::existing).collect();
            follow_jobs(connect(&config)?, &config, globals, output, follow, Work::Existing(handles))
                .await
        }
    }
}

fn connect(config: &Config) -> Result<Arc<dyn ApiClient>, DashError> {
    let client = HttpApiClient::new(&config.server.base_url, config.server.timeout()).map_err(|e| {
        DashError::usage(e.to_string()).with_suggestion(format!(
            "Check --server, {} or server.base_url in the config file",
            SERVER_ENV
        ))
    })?;
    Ok(Arc::new(client))
}

/// Jobs to follow: new ones to launch, or ones already running
enum Work {
    Launch(Vec<LaunchPlan>),
    Existing(Vec<JobHandle>),
}

async fn follow_jobs(
    client: Arc<dyn ApiClient>,
    config: &Config,
    globals: &Globals,
    output: OutputWriter,
    follow: FollowArgs,
    work: Work,
) -> Result<bool, DashError> {
    let mut observers = ObserverRegistry::new();

    let dashboard = if follow.tui {
        let (emitter, rx) = create_event_channel();
        observers.add(Box::new(emitter));
        Some(rx)
    } else {
        let stream = follow.stream || config.output.stream;
        let show_output = follow.show_output || config.output.show_output;
        if let Some(observer) = output.with_log_display(stream, show_output).into_observer() {
            observers.add(observer);
        }
        None
    };

    for spec in config.output.observers.iter().chain(follow.callbacks.iter()) {
        let observer = create_observer(spec).map_err(|e| {
            DashError::usage(format!("failed to load callback '{}': {}", spec, e))
                .with_suggestion("Known callbacks: json_log:<path>, timer, webhook:<url>")
        })?;
        if globals.verbose && !follow.tui {
            eprintln!("  {} Loaded callback: {}", "✓".green(), observer.name());
        }
        observers.add(observer);
    }

    let supervisor = JobSupervisor::new(client, PollerSettings::from(&config.polling), observers);

    // Ctrl-C stops following; jobs keep running unless asked otherwise
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let token = supervisor.token();
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping pollers");
                interrupted.store(true, Ordering::SeqCst);
                token.cancel();
            }
        });
    }

    // Quitting the dashboard stops following as well; Ctrl-C inside it
    // counts as an interrupt
    let tui_handle = dashboard.map(|rx| {
        let token = supervisor.token();
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            let mut tui_app = TuiApp::new(rx).with_interrupt_flag(interrupted);
            let result = tui_app.run().await;
            token.cancel();
            result
        })
    });

    let summary = match work {
        Work::Launch(plans) => supervisor.run(plans).await,
        Work::Existing(handles) => supervisor.watch(handles).await,
    };

    if let Some(handle) = tui_handle {
        match handle.await {
            Ok(result) => result?,
            Err(e) => warn!("dashboard task ended abnormally: {}", e),
        }
    }

    if follow.cancel_on_interrupt && interrupted.load(Ordering::SeqCst) {
        for (job_id, result) in supervisor.cancel_unfinished(&summary).await {
            match result {
                Ok(true) => eprintln!("{} {}", "CANCELLED".yellow().bold(), job_id),
                Ok(false) => eprintln!("{} {} (backend refused)", "NOT CANCELLED".red().bold(), job_id),
                Err(e) => eprintln!("{} {}: {}", "NOT CANCELLED".red().bold(), job_id, e),
            }
        }
    }

    Ok(!summary.has_failures())
}

fn read_log(file: Option<PathBuf>) -> Result<String, DashError> {
    match file {
        Some(path) => std::fs::read_to_string(&path).map_err(|e| DashError::Io {
            message: e.to_string(),
            path: Some(path),
        }),
        None => {
            let mut content = String::new();
            io::stdin().read_to_string(&mut content)?;
            Ok(content)
        }
    }
}

fn matches_filter(value: &str, filter: Option<&str>) -> bool {
    filter.map_or(true, |f| value.eq_ignore_ascii_case(f))
}

fn normalize_hosts(hosts: Vec<String>) -> Result<Vec<String>, DashError> {
    let mut unique: Vec<String> = Vec::with_capacity(hosts.len());
    for host in hosts {
        let host = host.trim().to_string();
        if !host.is_empty() && !unique.contains(&host) {
            unique.push(host);
        }
    }
    if unique.is_empty() {
        return Err(DashError::usage("no target hosts given")
            .with_suggestion("Pass -H host1,host2; `playdeck hosts` lists the inventory"));
    }
    Ok(unique)
}

/// Warn about hosts the backend does not know; the backend has the final say
async fn check_hosts(client: &dyn ApiClient, hosts: &[String]) {
    match client.hosts().await {
        Ok(inventory) => {
            for host in hosts {
                match inventory.get(host) {
                    None => warn!(host = %host, "host is not in the backend inventory"),
                    Some(entry) if !entry.valid => {
                        warn!(host = %host, "host facts could not be gathered; it may be unreachable")
                    }
                    Some(_) => {}
                }
            }
        }
        Err(e) => warn!("could not fetch inventory to check hosts: {}", e),
    }
}

/// Map names given on the command line to the paths the backend runs
async fn resolve_playbooks(
    client: &dyn ApiClient,
    requested: &[String],
) -> Result<Vec<String>, DashError> {
    let catalog = match client.playbooks().await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("could not fetch playbook list, using names as given: {}", e);
            return Ok(requested.to_vec());
        }
    };

    requested
        .iter()
        .map(|name| {
            resolve_playbook(name, &catalog).ok_or_else(|| {
                DashError::usage(format!("unknown playbook '{}'", name))
                    .with_suggestion("Run `playdeck playbooks` to list what the backend offers")
            })
        })
        .collect()
}

fn resolve_playbook(requested: &str, catalog: &[PlaybookInfo]) -> Option<String> {
    let wanted = display_name(requested).to_lowercase();
    catalog
        .iter()
        .find(|p| p.path == requested)
        .or_else(|| catalog.iter().find(|p| p.name.eq_ignore_ascii_case(requested)))
        .or_else(|| {
            catalog
                .iter()
                .find(|p| display_name(&p.path).to_lowercase() == wanted)
        })
        .map(|p| {
            if p.path.is_empty() {
                p.name.clone()
            } else {
                p.path.clone()
            }
        })
}

fn print_launch_report(format: OutputFormat, report: &LaunchReport) {
    match format {
        OutputFormat::Json => {
            for handle in &report.handles {
                println!(
                    "{}",
                    json!({
                        "event": "job_start",
                        "job_id": handle.job_id,
                        "playbook": handle.playbook,
                        "hosts": handle.hosts,
                        "group": handle.group,
                    })
                );
            }
            for failure in &report.failures {
                println!(
                    "{}",
                    json!({
                        "event": "job_refused",
                        "playbook": failure.plan.playbook,
                        "hosts": failure.plan.hosts,
                        "error": failure.error.to_string(),
                    })
                );
            }
        }
        OutputFormat::Text => {
            for handle in &report.handles {
                println!("{}  {}", handle.job_id.cyan(), handle.label);
            }
            for failure in &report.failures {
                eprintln!(
                    "{} {}: {}",
                    "✗".red(),
                    failure.plan.label.white().bold(),
                    failure.error
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, path: &str) -> PlaybookInfo {
        PlaybookInfo {
            name: name.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_playbook_by_name_path_or_stem() {
        let catalog = vec![
            info("Baseline Linux", "playbooks/linux/baseline/baseline_linux.yml"),
            info("Updates", "playbooks/linux/updates.yml"),
        ];

        assert_eq!(
            resolve_playbook("baseline linux", &catalog).as_deref(),
            Some("playbooks/linux/baseline/baseline_linux.yml")
        );
        assert_eq!(
            resolve_playbook("playbooks/linux/updates.yml", &catalog).as_deref(),
            Some("playbooks/linux/updates.yml")
        );
        assert_eq!(
            resolve_playbook("updates.yml", &catalog).as_deref(),
            Some("playbooks/linux/updates.yml")
        );
        assert_eq!(resolve_playbook("nope", &catalog), None);
    }

    #[test]
    fn test_normalize_hosts() {
        let hosts = normalize_hosts(vec![" h1".into(), "h2".into(), "h1".into(), "".into()]).unwrap();
        assert_eq!(hosts, vec!["h1", "h2"]);
        assert!(normalize_hosts(vec![" ".into()]).is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "playdeck", "-vv", "run", "baseline", "-H", "h1,h2", "-e", "a=1", "--tui",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { playbooks, hosts, extra_vars, follow, .. } => {
                assert_eq!(playbooks, vec!["baseline"]);
                assert_eq!(hosts, vec!["h1", "h2"]);
                assert_eq!(extra_vars, vec!["a=1"]);
                assert!(follow.tui);
            }
            _ => panic!("expected run"),
        }
    }
}
