use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use pcawg_tracker::app::{
    self, AnnotateOptions, AnnotateReport, App, ProgressSinkKind, UpdateOptions, UpdateReport,
};
use pcawg_tracker::config::{ConfigLoader, ResolvedConfig};
use pcawg_tracker::error::TrackerError;
use pcawg_tracker::output::{JsonOutput, OutputMode};
use pcawg_tracker::synapse::SynapseHttpClient;
use pcawg_tracker::tui::Tui;

#[derive(Parser)]
#[command(name = "pcawg-tracker")]
#[command(about = "Reconcile per-center VCF annotations into a canonical progress table")]
#[command(version)]
struct Cli {
    /// Print JSON reports and skip the terminal views
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Rule table (defaults to ./pcawg-tracker.json, the user config dir, then built-in rules)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Reconcile all organizations and refresh the progress table")]
    Update(UpdateArgs),
    #[command(about = "Write reconciled annotations back onto the files")]
    Annotate(AnnotateArgs),
    #[command(about = "Report which sample index columns sample ids come from")]
    Survey(SurveyArgs),
    #[command(about = "Print the resolved rule table")]
    Rules,
}

#[derive(Args)]
struct UpdateArgs {
    /// Local CSV/TSV (optionally gzipped) used instead of the sample index table
    #[arg(long)]
    sample_index: Option<Utf8PathBuf>,

    /// Delete every progress row before writing
    #[arg(long)]
    replace_table: bool,

    /// Render the chart even when no rows were added
    #[arg(long)]
    force_update: bool,

    #[arg(long)]
    dry_run: bool,

    #[arg(long, default_value = "pcawg-progress.svg")]
    chart: Utf8PathBuf,

    /// Fail when an identifier has no sample index entry
    #[arg(long)]
    strict_sample_index: bool,
}

#[derive(Args)]
struct AnnotateArgs {
    #[arg(required = true)]
    organizations: Vec<String>,

    #[arg(long)]
    sample_index: Option<Utf8PathBuf>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    strict_sample_index: bool,
}

#[derive(Args)]
struct SurveyArgs {
    #[arg(long)]
    sample_index: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TrackerError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TrackerError) -> u8 {
    if error.is_integrity_violation() {
        return 4;
    }
    match error {
        TrackerError::SynapseHttp(_)
        | TrackerError::SynapseStatus { .. }
        | TrackerError::SynapseJob(_)
        | TrackerError::TableCleared { .. } => 3,
        TrackerError::ConfigRead(_)
        | TrackerError::ConfigParse(_)
        | TrackerError::InvalidRule(_)
        | TrackerError::InvalidIdSpace(_)
        | TrackerError::InvalidVariantType(_)
        | TrackerError::UnknownOrganization(_)
        | TrackerError::MissingCredentials => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Update(args) => run_update(args, config, output_mode),
        Commands::Annotate(args) => run_annotate(args, config, output_mode),
        Commands::Survey(args) => run_survey(args, config, output_mode),
        Commands::Rules => {
            let report = app::describe_rules(&config);
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_rules(&report).into_diagnostic(),
                OutputMode::Interactive => {
                    for rule in &report.organizations {
                        println!(
                            "{:<10} {:<12} {:<16} {}",
                            rule.name,
                            rule.container_id,
                            rule.id_space.to_string(),
                            if rule.strict { "strict" } else { "lenient" }
                        );
                        for pattern in &rule.patterns {
                            println!("    {pattern}");
                        }
                    }
                    Ok(())
                }
            }
        }
    }
}

fn run_update(
    args: UpdateArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let options = UpdateOptions {
        replace_table: args.replace_table,
        force_update: args.force_update,
        dry_run: args.dry_run,
        chart_path: Some(args.chart),
        strict_sample_index: args.strict_sample_index,
        sample_index_path: args.sample_index,
    };
    let app = App::new(SynapseHttpClient::new()?, config);

    match output_mode {
        OutputMode::NonInteractive => {
            let report = app.update(options, &JsonOutput)?;
            JsonOutput::print_update(&report).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Update);
            let report = tui.run(move |sink| app.update(options, sink))?;
            tui.show_chart(&report.bars)?;
            print_update_summary(&report);
            Ok(())
        }
    }
}

fn run_annotate(
    args: AnnotateArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let options = AnnotateOptions {
        dry_run: args.dry_run,
        strict_sample_index: args.strict_sample_index,
        sample_index_path: args.sample_index,
    };
    let organizations = args.organizations;
    let app = App::new(SynapseHttpClient::new()?, config);

    match output_mode {
        OutputMode::NonInteractive => {
            let report = app.annotate(&organizations, options, &JsonOutput)?;
            JsonOutput::print_annotate(&report).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Annotate);
            let report = tui.run(move |sink| app.annotate(&organizations, options, sink))?;
            print_annotate_summary(&report);
            Ok(())
        }
    }
}

fn run_survey(
    args: SurveyArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let app = App::new(SynapseHttpClient::new()?, config);
    let report = match output_mode {
        OutputMode::NonInteractive => app.survey(args.sample_index.as_ref(), &JsonOutput)?,
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Survey);
            let path = args.sample_index;
            tui.run(move |sink| app.survey(path.as_ref(), sink))?
        }
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_survey(&report).into_diagnostic(),
        OutputMode::Interactive => {
            for entry in &report.entries {
                let columns = if entry.columns.is_empty() {
                    "no sample index column".to_string()
                } else {
                    entry.columns.join(", ")
                };
                println!("{:<10} {:>6}  {columns}", entry.organization, entry.count);
            }
            Ok(())
        }
    }
}

fn print_update_summary(report: &UpdateReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}pcawg-tracker update{reset}");
    for stats in &report.organizations {
        println!(
            "  {:<10} records {:>5}  kept {:>5}  skipped {:>4}  duplicates {:>4}  unmapped {:>4}",
            stats.organization,
            stats.records,
            stats.annotations,
            stats.skipped,
            stats.duplicates,
            stats.unmapped
        );
    }
    println!("{green}progress rows: {}{reset}", report.rows);
    match &report.publish {
        Some(outcome) if outcome.replaced => println!(
            "{green}table {}: replaced {} rows with {}{reset}",
            outcome.table_id, outcome.cleared, outcome.added
        ),
        Some(outcome) => println!(
            "{green}table {}: added {} rows{reset}",
            outcome.table_id, outcome.added
        ),
        None if report.dry_run => println!("{yellow}dry run: table not updated{reset}"),
        None => println!("{yellow}table not updated{reset}"),
    }
    if let Some(path) = &report.chart_path {
        println!("{green}chart: {path}{reset}");
    }
    if report.skipped > 0 || !report.notices.is_empty() {
        println!(
            "{yellow}skipped files: {}, notices: {}{reset}",
            report.skipped,
            report.notices.len()
        );
    }
}

fn print_annotate_summary(report: &AnnotateReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";

    for item in &report.items {
        println!(
            "  {} {} ({}): {}",
            item.organization,
            item.file_id,
            item.file_name,
            item.changed.join(", ")
        );
    }
    if report.dry_run {
        println!(
            "{yellow}dry run: {} entities would change{reset}",
            report.items.len()
        );
    } else {
        println!("{green}updated entities: {}{reset}", report.updated);
    }
    if !report.notices.is_empty() {
        println!("{yellow}notices: {}{reset}", report.notices.len());
    }
}
