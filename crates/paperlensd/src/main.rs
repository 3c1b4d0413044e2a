use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{builder::ArgAction, Parser, Subcommand};
use console::{style, Emoji};
use errors::PaperlensdErrors;
use paperlens::{
  analysis::ModelAnalyzer,
  clients::{daily, ArxivClient, DailyListClient},
  config::Config,
  database::Database,
  paper::{AnalysisMode, AnalysisResult, PaperIdentifier},
  pipeline::{ItemStatus, Pipeline},
};
use tracing::{debug, trace};
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod errors;

static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
static BOOKS: Emoji<'_, '_> = Emoji("📚 ", "");
static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static PAPER: Emoji<'_, '_> = Emoji("📄 ", "");
static SAVE: Emoji<'_, '_> = Emoji("💾 ", "");
static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✨ ", "");
static STAR: Emoji<'_, '_> = Emoji("🌟 ", "* ");

#[derive(Parser)]
#[command(author, version, about = "Ingest and summarize daily research papers")]
struct Cli {
  /// Verbose mode (-v, -vv, -vvv)
  #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging verbosity"
    )]
  verbose: u8,

  /// Path to the database file (defaults to the user data directory)
  #[arg(long, global = true)]
  database: Option<PathBuf>,

  /// Answer yes to every confirmation prompt
  #[arg(long, global = true)]
  accept_defaults: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Initialize a new paperlens database
  Init,
  /// Fetch, analyze, and store papers
  Ingest {
    /// arXiv identifiers or URLs; without any, the daily listing is used
    identifiers: Vec<String>,
    /// Daily listing date (YYYY-MM-DD), defaults to yesterday
    #[arg(long, conflicts_with = "identifiers")]
    date:        Option<NaiveDate>,
    /// Process at most this many papers
    #[arg(long, short)]
    limit:       Option<usize>,
  },
  /// Fetch and analyze one paper, printing the result
  Analyze {
    /// arXiv identifier or URL
    identifier: String,
    /// Print the full record as JSON
    #[arg(long)]
    json:       bool,
    /// Also store the record
    #[arg(long)]
    save:       bool,
  },
  /// Show a stored paper and its analysis
  Show {
    /// arXiv identifier or URL
    identifier: String,
    /// Print the stored paper as JSON
    #[arg(long)]
    json:       bool,
  },
  /// List the most frequent keywords across stored papers
  Keywords {
    /// Number of keywords to list
    #[arg(long, short, default_value_t = 20)]
    limit: usize,
  },
  /// Removes the entire database
  Clean,
}

/// Setup logging with the specified verbosity level, optionally also into daily log files
fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Result<(), PaperlensdErrors> {
  let filter = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_file(true)
    .with_line_number(true)
    .with_thread_ids(true)
    .with_target(true);

  let file_layer = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)?;
      let file_appender = rolling::RollingFileAppender::builder()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("paperlensd")
        .filename_suffix("log")
        .build(dir)?;
      Some(
        tracing_subscriber::fmt::layer()
          .with_writer(file_appender)
          .with_ansi(false)
          .with_target(true),
      )
    },
    None => None,
  };

  tracing_subscriber::registry().with(stderr_layer).with(file_layer).with(filter).init();
  Ok(())
}

/// Asks for confirmation unless `--accept-defaults` was given
fn confirm(accept_defaults: bool, prompt: &str) -> Result<bool, PaperlensdErrors> {
  if accept_defaults {
    return Ok(true);
  }
  Ok(dialoguer::Confirm::new().with_prompt(prompt).default(false).wait_for_newline(true).interact()?)
}

/// Asks the user to type `word` unless `--accept-defaults` was given
fn confirm_typed(accept_defaults: bool, word: &str, action: &str) -> Result<bool, PaperlensdErrors> {
  if accept_defaults {
    return Ok(true);
  }
  let input = dialoguer::Input::<String>::new()
    .with_prompt(format!(
      "{} Type {} to confirm {action}",
      style("⚠️").red(),
      style(word).red().bold()
    ))
    .interact_text()?;
  Ok(input == word)
}

/// Deletes the database file and its SQLite side files
fn remove_database_files(path: &Path) -> Result<(), PaperlensdErrors> {
  std::fs::remove_file(path)?;
  for file in glob::glob(&format!("{}*", path.display()))?.flatten() {
    std::fs::remove_file(file)?;
  }
  Ok(())
}

/// Opens the database, creating parent directories as needed
async fn open_database(path: &Path) -> Result<Database, PaperlensdErrors> {
  if let Some(parent) = path.parent() {
    trace!("Creating parent directories: {}", parent.display());
    std::fs::create_dir_all(parent)?;
  }
  trace!("Using database at: {}", path.display());
  Ok(Database::open(path).await?)
}

/// Tells the user a read-only command found nothing to read
fn print_missing_database(path: &Path) {
  println!(
    "{} No database found at: {}",
    style(WARNING).yellow(),
    style(path.display()).yellow()
  );
}

/// Prints the analysis part of a record
fn print_analysis(analysis: &AnalysisResult, mode: &AnalysisMode) {
  println!("   {} {}", style("Problem:").green().bold(), style(&analysis.problem).white());
  println!("   {} {}", style("Solution:").green().bold(), style(&analysis.solution).white());
  println!("   {} {}", style("Effect:").green().bold(), style(&analysis.effect).white());
  if !analysis.keywords.is_empty() {
    println!(
      "   {} {}",
      style("Keywords:").green().bold(),
      style(analysis.keywords.join(", ")).cyan()
    );
  }

  let score = format!("{:.2}", analysis.breakthrough_score);
  let score = if analysis.breakthrough_label {
    format!("{}{}", STAR, style(score).yellow().bold())
  } else {
    style(score).white().to_string()
  };
  println!(
    "   {} {} ({})",
    style("Breakthrough:").green().bold(),
    score,
    style(&analysis.breakthrough_reason).italic()
  );

  for (i, finding) in analysis.findings.iter().enumerate() {
    println!("   {} {}", style(format!("Finding {}:", i + 1)).green(), finding.claim_text);
    for metric in &finding.metrics {
      let value = metric.value.as_ref().map(ToString::to_string).unwrap_or_default();
      let dataset = metric.dataset.as_deref().map(|d| format!(" on {d}")).unwrap_or_default();
      println!("      - {}{}: {}", metric.name, dataset, style(value).yellow());
    }
  }

  match mode {
    AnalysisMode::Model { model } =>
      println!("   {} {}", style("Analyzed by:").green().bold(), style(model).cyan()),
    AnalysisMode::Heuristic { reason } => println!(
      "   {} heuristic fallback ({})",
      style("Analyzed by:").yellow().bold(),
      style(reason).yellow()
    ),
  }
}

#[tokio::main]
async fn main() -> Result<(), PaperlensdErrors> {
  let dotenv = dotenvy::dotenv();
  let cli = Cli::parse();
  let path = cli.database.clone().unwrap_or_else(Database::default_path);

  let log_dir = match cli.command {
    Commands::Ingest { .. } => path.parent().map(|parent| parent.join("logs")),
    _ => None,
  };
  setup_logging(cli.verbose, log_dir.as_deref())?;
  match dotenv {
    Ok(env_file) => debug!("Loaded environment from {}", env_file.display()),
    Err(e) => trace!("No .env file loaded: {e}"),
  }

  match cli.command {
    Commands::Init => {
      if cli.database.is_none() {
        println!(
          "{} Using default database path: {}",
          style(BOOKS).cyan(),
          style(path.display()).yellow()
        );
      }

      if path.exists() {
        println!(
          "{} Database already exists at: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );

        if !confirm(
          cli.accept_defaults,
          "Do you want to reinitialize this database? This will erase all existing data",
        )? || !confirm_typed(cli.accept_defaults, "INIT", "reinitialization")?
        {
          println!("{} Keeping existing database", style("ℹ").blue());
          return Ok(());
        }

        println!("{} Removing existing database", style(WARNING).yellow());
        remove_database_files(&path)?;
      }

      println!(
        "{} Initializing database at: {}",
        style(ROCKET).cyan(),
        style(path.display()).yellow()
      );

      open_database(&path).await?;

      println!("{} Database initialized successfully!", style(SUCCESS).green());
      Ok(())
    },

    Commands::Ingest { identifiers, date, limit } => {
      let config = Config::from_env()?;
      let (ids, listing_date) = if identifiers.is_empty() {
        let date = date.unwrap_or_else(daily::default_listing_date);
        println!(
          "{} Fetching daily listing for {}",
          style(LOOKING_GLASS).cyan(),
          style(date).yellow()
        );
        (DailyListClient::from_config(&config)?.fetch_identifiers(date).await?, Some(date))
      } else {
        let ids = identifiers
          .iter()
          .map(|id| id.parse::<PaperIdentifier>())
          .collect::<Result<Vec<_>, _>>()?;
        (ids, None)
      };
      let ids: Vec<PaperIdentifier> = ids.into_iter().take(limit.unwrap_or(usize::MAX)).collect();

      if ids.is_empty() {
        println!("{} No papers to ingest", style(WARNING).yellow());
        return Ok(());
      }

      let analyzer = ModelAnalyzer::from_config(&config)?;
      if !analyzer.is_configured() {
        println!(
          "{} LLM_API_KEY is not set, papers will get heuristic analyses",
          style(WARNING).yellow()
        );
      }
      let db = open_database(&path).await?;
      let pipeline = Pipeline::new(ArxivClient::from_config(&config)?, analyzer, db);

      println!("{} Ingesting {} papers", style(ROCKET).cyan(), style(ids.len()).yellow());
      let report = pipeline
        .run_batch(&ids, listing_date, |index, total, id, status| {
          let position = style(format!("[{index}/{total}]")).dim();
          match status {
            ItemStatus::Stored { by_model, breakthrough } => {
              let mut notes = Vec::new();
              if !by_model {
                notes.push(style("heuristic").dim().to_string());
              }
              if breakthrough {
                notes.push(format!("{}{}", STAR, style("breakthrough").yellow().bold()));
              }
              println!("{position} {} {} {}", style(SAVE).green(), style(id).yellow(), notes.join(" "));
            },
            ItemStatus::Skipped =>
              println!("{position} {} {} already stored", style("ℹ").blue(), style(id).yellow()),
            ItemStatus::Failed =>
              println!("{position} {} {} failed", style("✖").red(), style(id).yellow()),
          }
        })
        .await;

      println!(
        "\n{} Stored {}, skipped {}, failed {}",
        style(SUCCESS).green(),
        style(report.stored.len()).green(),
        style(report.skipped.len()).blue(),
        style(report.failed.len()).red()
      );
      for (id, reason) in &report.failed {
        println!("   {} {}: {}", style("✖").red(), style(id).yellow(), reason);
      }
      Ok(())
    },

    Commands::Analyze { identifier, json, save } => {
      let id: PaperIdentifier = identifier.parse()?;
      let config = Config::from_env()?;
      // Nothing touches the user's database without --save.
      let db = if save { open_database(&path).await? } else { Database::open_in_memory().await? };
      let pipeline = Pipeline::new(
        ArxivClient::from_config(&config)?,
        ModelAnalyzer::from_config(&config)?,
        db,
      );

      if !json {
        println!("{} Analyzing paper: {}", style(LOOKING_GLASS).cyan(), style(&id).yellow());
      }
      let record = pipeline.analyze(&id).await?;
      debug!("Record for {id}: {:?}", record.analysis);

      if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
      } else {
        println!("\n{} {}", style(PAPER).green(), style(&record.document.title).white().bold());
        println!(
          "   {} {}",
          style("Source:").green().bold(),
          style(&record.document.source_url).blue().underlined()
        );
        print_analysis(&record.analysis, &record.mode);
      }

      if save {
        match pipeline.store().save_record(&record).await {
          Ok(row) => println!("\n{} Saved paper with ID: {}", style(SAVE).green(), style(row).yellow()),
          Err(e) if e.is_duplicate_error() =>
            println!("\n{} This paper is already in your database", style("ℹ").blue()),
          Err(e) => return Err(PaperlensdErrors::Paperlens(e)),
        }
      }
      Ok(())
    },

    Commands::Show { identifier, json } => {
      let id: PaperIdentifier = identifier.parse()?;
      if !path.exists() {
        print_missing_database(&path);
        return Ok(());
      }
      let db = open_database(&path).await?;

      match db.get_paper(&id).await? {
        Some(paper) if json => println!("{}", serde_json::to_string_pretty(&paper)?),
        Some(paper) => {
          debug!("Found paper: {:?}", paper.identifier);
          println!("\n{} Paper details:", style(PAPER).green());
          println!("   {} {}", style("Title:").green().bold(), style(&paper.title).white());
          println!(
            "   {} {}",
            style("Authors:").green().bold(),
            style(paper.authors.join(", ")).white()
          );
          if !paper.institutions.is_empty() {
            println!(
              "   {} {}",
              style("Institutions:").green().bold(),
              style(paper.institutions.join(", ")).white()
            );
          }
          if let Some(published) = paper.published_at {
            println!(
              "   {} {}",
              style("Published:").green().bold(),
              style(published.date_naive()).white()
            );
          }
          if let Some(listing_date) = paper.listing_date {
            println!("   {} {}", style("Daily listing:").green().bold(), style(listing_date).white());
          }
          println!(
            "   {} {}",
            style("Source:").green().bold(),
            style(&paper.source_url).blue().underlined()
          );
          print_analysis(&paper.analysis, &paper.mode);
        },
        None => {
          println!("{} Paper not found", style(WARNING).yellow());
        },
      }
      Ok(())
    },

    Commands::Keywords { limit } => {
      if !path.exists() {
        print_missing_database(&path);
        return Ok(());
      }
      let db = open_database(&path).await?;
      let stats = db.top_keywords(limit).await?;

      if stats.is_empty() {
        println!("{} No keywords recorded yet", style(WARNING).yellow());
      } else {
        println!("\n{} Top {} keywords:", style(SUCCESS).green(), style(stats.len()).yellow());
        for stat in stats {
          println!(
            "   {:>5}  {}",
            style(stat.paper_count).yellow(),
            style(&stat.keyword).white().bold()
          );
        }
      }
      Ok(())
    },

    Commands::Clean => {
      if path.exists() {
        println!(
          "{} Database found at: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );

        if !confirm(cli.accept_defaults, "Are you sure you want to delete this database?")?
          || !confirm_typed(cli.accept_defaults, "DELETE", "deletion")?
        {
          println!("{} Operation cancelled", style("✖").red());
          return Ok(());
        }

        println!(
          "{} Removing database: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );
        remove_database_files(&path)?;
        println!("{} Database files cleaned", style(SUCCESS).green());
      } else {
        println!(
          "{} No database found at: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );
      }
      Ok(())
    },
  }
}
