use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use sv_core::{format_long_date, VisitId, VisitRecord, VisitRepository};
use sv_export::{export, ExportFormat};
use sv_store::{config_path, load_config, open_store, AppConfig, MemoryStore};
use sv_utils::truncate;
use sv_views::{group_by, month_view, monthly_trend, summarize, GroupField, YearMonth};

pub mod logging;

use logging::{init_logging, LogConfig, LogFormat};

#[derive(Parser)]
#[command(name = "sitevisits", version, about = "Contractor site-visit dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Dataset file (YAML or JSON). Overrides config and environment.
    #[arg(long, global = true, value_name = "PATH")]
    data: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    /// Log output format.
    #[arg(long = "log-format", value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatArg,
}

#[derive(Subcommand)]
enum Command {
    /// Open the interactive dashboard.
    Tui,
    /// List all visits.
    List,
    /// Search visits by contractor, company, or job type.
    Search { query: String },
    /// Show a single visit by id.
    Show { id: String },
    /// Print a month calendar with its agenda.
    Calendar {
        /// Month as YYYY-MM. Defaults to the current month.
        #[arg(long)]
        month: Option<String>,
    },
    /// Print summary statistics and distributions.
    Stats,
    /// Export all visits.
    Export {
        #[arg(long, value_enum, default_value = "csv")]
        format: FormatArg,
        /// Output file or directory. Prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the resolved configuration.
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Tsv,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Tsv => ExportFormat::Tsv,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Tui);
    let interactive = matches!(command, Command::Tui);

    // The dashboard owns the terminal, so it only ever logs to a file.
    if !interactive || cli.log_file.is_some() {
        let log_config = LogConfig::from_verbosity(cli.verbose)
            .with_format(cli.log_format.into())
            .with_log_file(cli.log_file.clone());
        init_logging(&log_config)?;
    }

    let config = load_config().context("failed to load config")?;
    let data_path = cli.data.clone().or_else(|| config.resolve_data_path());
    debug!(data = ?data_path, "resolved dataset");

    if let Command::Config = command {
        print!("{}", describe_config(&config, data_path.as_deref())?);
        return Ok(());
    }

    let store = open_store(data_path.as_deref()).context("failed to load visits")?;
    info!(visits = store.len(), "store ready");

    match command {
        Command::Tui => sv_tui::run(store, config.resolve_export_dir()),
        Command::List => {
            print!("{}", render_rows(store.list().iter()));
            Ok(())
        }
        Command::Search { query } => {
            print!("{}", render_rows(store.search(&query).into_iter()));
            Ok(())
        }
        Command::Show { id } => show_visit(&store, &id),
        Command::Calendar { month } => {
            let month = match month {
                Some(value) => value.parse::<YearMonth>().context("invalid --month")?,
                None => YearMonth::from_date(Local::now().date_naive()),
            };
            print!("{}", render_calendar(store.list(), month));
            Ok(())
        }
        Command::Stats => {
            print!("{}", render_stats(store.list()));
            Ok(())
        }
        Command::Export { format, output } => {
            export_visits(store.list(), format.into(), output.as_deref())
        }
        Command::Config => unreachable!("handled above"),
    }
}

fn describe_config(config: &AppConfig, data_path: Option<&Path>) -> Result<String> {
    let path = config_path().context("failed to locate config")?;
    let data = data_path.map_or_else(|| "(demo data)".to_string(), |path| path.display().to_string());
    Ok(format!(
        "config: {}\ndata: {}\nexport dir: {}\n",
        path.display(),
        data,
        config.resolve_export_dir().display()
    ))
}

fn render_rows<'a>(visits: impl Iterator<Item = &'a VisitRecord>) -> String {
    let mut out = String::new();
    for visit in visits {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            visit.id,
            visit.date,
            truncate(&visit.contractor_name, 24),
            truncate(&visit.company, 28),
            visit.job_type,
            visit.status
        );
    }
    out
}

fn show_visit(store: &MemoryStore, id: &str) -> Result<()> {
    let visit = store
        .get(&VisitId::new(id))
        .ok_or_else(|| anyhow!("visit {id} not found"))?;
    print!("{}", render_visit(visit));
    Ok(())
}

fn render_visit(visit: &VisitRecord) -> String {
    let next = visit
        .next_scheduled
        .map_or_else(|| "-".to_string(), format_long_date);
    format!(
        "# {contractor}\n\n\
         - Company: {company}\n\
         - Job Type: {job}\n\
         - Date: {date}\n\
         - Time: {time_in} - {time_out}\n\
         - Status: {status}\n\
         - Recurrence: {recurrence}\n\
         - Next Scheduled: {next}\n\
         - Contact: {email}, {phone}\n\n\
         {description}\n",
        contractor = visit.contractor_name,
        company = visit.company,
        job = visit.job_type,
        date = format_long_date(visit.date),
        time_in = visit.time_in.to_12h(),
        time_out = visit.time_out.to_12h(),
        status = visit.status,
        recurrence = visit.recurrence,
        email = visit.contact_email,
        phone = visit.contact_phone,
        description = visit.description,
    )
}

fn render_calendar(visits: &[VisitRecord], month: YearMonth) -> String {
    let view = month_view(visits, month);
    let mut out = String::new();
    let _ = writeln!(out, "{}", month.long_label());
    let _ = writeln!(out, "Su  Mo  Tu  We  Th  Fr  Sa");
    for week in view.grid.weeks() {
        let line = week
            .iter()
            .map(|slot| match slot {
                Some(day) => {
                    let marker = if view.day(*day).is_some_and(|entry| !entry.visits.is_empty()) {
                        '*'
                    } else {
                        ' '
                    };
                    format!("{day:>2}{marker}")
                }
                None => "   ".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(out, "{}", line.trim_end());
    }
    let _ = writeln!(out);
    if view.agenda.is_empty() {
        let _ = writeln!(out, "No visits in {}", month.label());
    }
    for visit in &view.agenda {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}",
            visit.date, visit.contractor_name, visit.job_type, visit.status
        );
    }
    out
}

fn render_stats(visits: &[VisitRecord]) -> String {
    let summary = summarize(visits);
    let mut out = String::new();
    let _ = writeln!(out, "Total visits: {}", summary.total);
    let _ = writeln!(out, "Completed: {}", summary.completed);
    let _ = writeln!(out, "Upcoming: {}", summary.scheduled);
    let _ = writeln!(out, "In progress: {}", summary.in_progress);
    let _ = writeln!(out, "Cancelled: {}", summary.cancelled);
    let _ = writeln!(out, "Completion rate: {}%", summary.completion_rate);

    for field in [GroupField::JobType, GroupField::Status, GroupField::Recurrence] {
        let _ = writeln!(out, "\n{}", field.label());
        for group in group_by(visits, field) {
            let _ = writeln!(out, "  {}\t{}", group.value, group.count);
        }
    }

    let _ = writeln!(out, "\nMonthly trend");
    for point in monthly_trend(visits) {
        let _ = writeln!(out, "  {}\t{}", point.period.label(), point.count);
    }
    out
}

fn export_visits(visits: &[VisitRecord], format: ExportFormat, output: Option<&Path>) -> Result<()> {
    let contents = export(visits, format).context("failed to render export")?;
    let Some(output) = output else {
        print!("{contents}");
        return Ok(());
    };
    let target = export_target(output, format);
    if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create export directory")?;
    }
    std::fs::write(&target, contents).context("failed to write export")?;
    info!(path = %target.display(), rows = visits.len(), %format, "export written");
    println!("Exported {} visit(s) to {}", visits.len(), target.display());
    Ok(())
}

fn export_target(output: &Path, format: ExportFormat) -> PathBuf {
    if output.is_dir() {
        output.join(format.default_file_name())
    } else {
        output.to_path_buf()
    }
}
