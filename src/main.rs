//! CLI entry point for `mailpeek`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailpeek::config::Config;
use mailpeek::imap::ResponseStream;
use mailpeek::message::pipeline::{self, MessageListing};
use mailpeek::message::{render, FetchedMessage, MessageView, View};

#[derive(Parser)]
#[command(
    name = "mailpeek",
    version,
    about = "Read a single IMAP message without marking it as read"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: $MAILPEEK_CONFIG or the user config dir)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one message by sequence number and print it
    Read {
        /// Message sequence number (1 is the oldest)
        sequence: u32,
        /// Mailbox to read from (default: account.mailbox)
        #[arg(short, long)]
        mailbox: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// List the newest messages of a mailbox
    List {
        /// Number of messages to show (default: display.list_limit)
        #[arg(short = 'n', long)]
        limit: Option<u32>,
        /// Mailbox to list (default: account.mailbox)
        #[arg(short, long)]
        mailbox: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Decode a saved FETCH response or .eml file without contacting a server
    Parse {
        /// File holding the raw response or message
        file: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Args)]
struct OutputArgs {
    /// What to show: summary, headers, body, full (default: display.default_view)
    #[arg(long, value_name = "VIEW")]
    view: Option<View>,
    /// Body lines in the summary view (default: display.summary_lines)
    #[arg(short, long)]
    lines: Option<usize>,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = mailpeek::config::load_config(cli.config.as_deref())?;

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Read {
            sequence,
            mailbox,
            output,
        } => cmd_read(&config, sequence, mailbox, &output),
        Commands::List {
            limit,
            mailbox,
            json,
        } => cmd_list(&config, limit, mailbox, json),
        Commands::Parse { file, output } => cmd_parse(&config, &file, &output),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with `RUST_LOG` taking precedence over `level`.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mailpeek::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailpeek.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailpeek", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Fetch one message from the server and print it.
fn cmd_read(
    config: &Config,
    sequence: u32,
    mailbox: Option<String>,
    output: &OutputArgs,
) -> anyhow::Result<()> {
    let view = resolve_view(output, config)?;
    let mailbox = mailbox.unwrap_or_else(|| config.account.mailbox.clone());
    let creds = mailpeek::credentials::resolve(&config.account)
        .context("Could not resolve account credentials")?;

    let pb = spinner(format!(
        "Fetching message {sequence} from {} ({})",
        mailbox, config.account.host
    ));
    let result = pipeline::fetch_message(
        &config.account,
        &creds,
        &mailbox,
        sequence,
        &config.performance,
    );
    pb.finish_and_clear();

    let message =
        result.with_context(|| format!("Could not read message {sequence} from '{mailbox}'"))?;
    let lines = output.lines.unwrap_or(config.display.summary_lines);
    print_message(&message, view, lines, output.json)
}

/// List the newest messages of a mailbox.
fn cmd_list(
    config: &Config,
    limit: Option<u32>,
    mailbox: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let limit = limit.unwrap_or(config.display.list_limit);
    let mailbox = mailbox.unwrap_or_else(|| config.account.mailbox.clone());
    let creds = mailpeek::credentials::resolve(&config.account)
        .context("Could not resolve account credentials")?;

    let pb = spinner(format!("Listing {mailbox} on {}", config.account.host));
    let result = pipeline::list_recent(
        &config.account,
        &creds,
        &mailbox,
        limit,
        &config.performance,
    );
    pb.finish_and_clear();

    let listing = result.with_context(|| format!("Could not list '{mailbox}'"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        print_listing_table(&listing);
    }
    Ok(())
}

/// Decode a file offline.
fn cmd_parse(config: &Config, file: &Path, output: &OutputArgs) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let view = resolve_view(output, config)?;
    let bytes = std::fs::read(file).with_context(|| format!("Could not read {}", file.display()))?;

    let stream = ResponseStream::new(bytes);
    let message = mailpeek::message::decode_stream(&stream, None, &config.performance)
        .with_context(|| format!("Could not decode {}", file.display()))?;
    let lines = output.lines.unwrap_or(config.display.summary_lines);
    print_message(&message, view, lines, output.json)
}

fn resolve_view(output: &OutputArgs, config: &Config) -> anyhow::Result<View> {
    match output.view {
        Some(view) => Ok(view),
        None => config
            .display
            .default_view
            .parse()
            .map_err(|e: String| anyhow::anyhow!("display.default_view: {e}")),
    }
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── Output ──────────────────────────────────────────────────────

/// Print a message view as text or JSON, followed by any degradation notes.
fn print_message(
    message: &FetchedMessage,
    view: View,
    lines: usize,
    json: bool,
) -> anyhow::Result<()> {
    let rendered = render(message, view, lines);

    if json {
        let output = serde_json::json!({
            "sequence": message.sequence,
            "size": message.size,
            "date": message.date.map(|d| d.to_rfc3339()),
            "literal": message.literal_kind,
            "degradations": message.degradations,
            "message": rendered,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_view_text(message, &rendered);
    for problem in &message.degradations {
        eprintln!("  warning: {problem}");
    }
    Ok(())
}

fn print_view_text(message: &FetchedMessage, view: &MessageView<'_>) {
    use humansize::{format_size, BINARY};

    match view {
        MessageView::Summary {
            from,
            date,
            subject,
            preview,
            truncated,
        } => {
            println!();
            println!("  {:<10} {}", "From:", from);
            println!("  {:<10} {}", "Date:", date);
            println!("  {:<10} {}", "Subject:", subject);
            println!("  {:<10} {}", "Size:", format_size(message.size, BINARY));
            println!();
            for line in preview {
                println!("  {line}");
            }
            if *truncated {
                println!("  [...]");
            }
            println!();
        }
        MessageView::Headers { headers } => {
            let width = headers.name_width() + 1;
            for header in headers.iter() {
                println!("{:<width$} {}", format!("{}:", header.name), header.value);
            }
        }
        MessageView::Body { body } => {
            println!("{}", body.text);
        }
        MessageView::Full { headers, body } => {
            let width = headers.name_width() + 1;
            for header in headers.iter() {
                println!("{:<width$} {}", format!("{}:", header.name), header.value);
            }
            println!();
            println!("{}", body.text);
        }
    }
}

/// Print the `list` output as a table.
fn print_listing_table(listing: &[MessageListing]) {
    println!();
    if listing.is_empty() {
        println!("  Mailbox is empty.");
        println!();
        return;
    }

    println!("  {:<6} {:<31} {:<25} {}", "#", "Date", "From", "Subject");
    println!("  {}", "-".repeat(98));
    for entry in listing {
        let date: String = entry.date.chars().take(31).collect();
        let from: String = entry.from.chars().take(24).collect();
        let subject: String = entry.subject.chars().take(34).collect();
        println!(
            "  {:<6} {:<31} {:<25} {}",
            entry.sequence, date, from, subject
        );
    }
    println!();
}
