use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::{theme::ColorfulTheme, MultiSelect, Select};
use std::io::{Read, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use market_lens_core::{
    extract, extract_strict, normalize, strip_for_display, ChartConfig, Config, Locale,
    MarketClient, SelectionEvent, Session, StreamEvent, TurnOutcome,
};

#[derive(Parser)]
#[command(name = "market-lens")]
#[command(about = "Chat-driven market research: ask the backend, get charts and trend summaries")]
struct Cli {
    /// Backend base URL (overrides config and MARKET_LENS_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Language for client messages: ja or en
    #[arg(long, global = true)]
    locale: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question
    Ask {
        /// Your question
        question: String,
        /// Stream the answer as it is generated
        #[arg(short, long)]
        stream: bool,
        /// Skip the web-search enrichment after a streamed answer
        #[arg(long)]
        no_enrich: bool,
        /// Print the extracted chart and summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pick category, subcategory and region interactively, then ask
    Guided {
        #[arg(short, long)]
        stream: bool,
    },
    /// Extract chart config and summary from a saved answer ("-" reads stdin)
    Extract {
        file: PathBuf,
        /// Treat placeholder series data as no chart
        #[arg(long)]
        strict: bool,
        /// Fill the chart config with renderer defaults
        #[arg(long)]
        normalize: bool,
        /// Print the chart as CSV instead of JSON
        #[arg(long)]
        table: bool,
        /// Print the answer text with chart and summary sections removed
        #[arg(long)]
        display: bool,
    },
    /// List product categories
    Categories,
    /// List subcategories, optionally for one category
    Subcategories { category: Option<String> },
    /// List regions
    Regions,
    /// Check that the backend is up
    Health,
    /// Show or change the saved configuration
    Config {
        #[arg(long)]
        set_api_url: Option<String>,
        #[arg(long)]
        set_locale: Option<String>,
    },
}

fn init_logging() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log filter")?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let mut config = Config::load().context("Failed to load config")?;
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(code) = &cli.locale {
        config.locale = code.parse()?;
    }
    debug!(api = %config.base_url(), locale = %config.locale, "config loaded");

    match cli.command {
        Commands::Ask { question, stream, no_enrich, json } => {
            let mut session = Session::from_config(&config).with_enrichment(!no_enrich);
            run_turn(&mut session, &question, stream, json).await?
        }
        Commands::Guided { stream } => guided(&config, stream).await?,
        Commands::Extract { file, strict, normalize, table, display } => {
            extract_file(&file, strict, normalize, table, display)?
        }
        Commands::Categories => {
            let client = MarketClient::new(&config);
            print_list("Categories", &client.categories().await?);
        }
        Commands::Subcategories { category } => {
            let client = MarketClient::new(&config);
            print_list("Subcategories", &client.subcategories(category.as_deref()).await?);
        }
        Commands::Regions => {
            let client = MarketClient::new(&config);
            print_list("Regions", &client.regions().await?);
        }
        Commands::Health => {
            let client = MarketClient::new(&config);
            let health = client
                .health()
                .await
                .with_context(|| format!("Backend at {} is not reachable", client.base_url()))?;
            println!("{} {} ({})", "✔".green(), health.status.bold(), health.service.dimmed());
        }
        Commands::Config { set_api_url, set_locale } => {
            update_config(set_api_url, set_locale)?;
        }
    }

    Ok(())
}

/// Cancelled on Ctrl-C so a running stream stops cleanly.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

async fn run_turn(session: &mut Session, question: &str, stream: bool, json: bool) -> Result<()> {
    println!("{} {}\n", "❓".bold(), question.cyan());

    let outcome = if stream {
        let cancel = cancel_on_ctrl_c();
        let result = session
            .ask_streaming(question, &cancel, |event, _| print_stream_event(event))
            .await;
        println!();
        result
    } else {
        session.ask(question).await
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(apology) = session.conversation().messages().last() {
                println!("{}", apology.content.red());
            }
            return Err(e.into());
        }
    };

    if json {
        let report = serde_json::json!({
            "message_id": outcome.message_id,
            "chart_config": session.conversation().current_chart,
            "summary_text": session.conversation().current_summary,
            "enrichment": outcome.enrichment,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_outcome(session, &outcome, !stream)
}

fn print_stream_event(event: &StreamEvent) {
    match event {
        StreamEvent::Content(text) => print!("{}", text),
        StreamEvent::Status(text) => print!("\n{}\n", text.italic().dimmed()),
        StreamEvent::Error(text) => print!("\n{} {}\n", "Error:".red().bold(), text),
        StreamEvent::Chart(_) => print!("\n{}\n", "📊 chart updated".dimmed()),
    }
    let _ = std::io::stdout().flush();
}

fn print_outcome(session: &Session, outcome: &TurnOutcome, print_answer: bool) -> Result<()> {
    let conversation = session.conversation();

    if print_answer {
        if let Some(message) = conversation.message(&outcome.message_id) {
            println!("{}", "Answer:".bold().green());
            println!("{}\n", strip_for_display(&message.content));
        }
    }

    if let Some(chart) = &conversation.current_chart {
        print_chart(chart)?;
    }

    match &conversation.current_summary {
        Some(summary) => {
            println!("\n{}", "📈 Market Trend Summary".bold().blue());
            println!("{}", "=".repeat(40).dimmed());
            println!("{}", summary);
        }
        None if outcome.extraction.summary_text.is_some() => {
            println!("{}", "Summary found but too thin to report".yellow());
        }
        None => {}
    }

    if let Some(enrichment) = &outcome.enrichment {
        println!("\n{}", "🔎 Web search".bold().magenta());
        println!("{}", enrichment);
    }
    Ok(())
}

fn print_chart(chart: &ChartConfig) -> Result<()> {
    println!(
        "{} {}",
        "📊".bold(),
        chart.title_text().unwrap_or("Chart").bold().green()
    );
    match chart.to_table() {
        Some(table) => print!("{}", table.to_csv()?),
        None => println!("{}", "(chart has no category axis to tabulate)".dimmed()),
    }
    Ok(())
}

async fn guided(config: &Config, stream: bool) -> Result<()> {
    let mut session = Session::from_config(config);
    let theme = ColorfulTheme::default();

    let categories = session.client().categories().await?;
    let category = pick(&theme, "Select a product category", &categories)?;
    session.select(SelectionEvent::Category(category.clone()))?;

    let subcategories = session.client().subcategories(Some(category.as_str())).await?;
    let subcategory = pick(&theme, "Select a subcategory", &subcategories)?;
    session.select(SelectionEvent::Subcategory(subcategory))?;

    let regions = session.client().regions().await?;
    let chosen = MultiSelect::with_theme(&theme)
        .with_prompt("Select regions (none selected means all regions)")
        .items(&regions)
        .interact()?;
    let event = if chosen.is_empty() {
        SelectionEvent::AllRegions
    } else {
        SelectionEvent::Regions(chosen.into_iter().map(|i| regions[i].clone()).collect())
    };

    let question = session
        .select(event)?
        .ok_or_else(|| anyhow!("Selection did not complete"))?;
    run_turn(&mut session, &question, stream, false).await
}

fn pick(theme: &ColorfulTheme, prompt: &str, options: &[String]) -> Result<String> {
    if options.is_empty() {
        return Err(anyhow!("The backend returned no options for: {}", prompt));
    }
    let index = Select::with_theme(theme)
        .with_prompt(prompt)
        .items(options)
        .default(0)
        .interact()?;
    Ok(options[index].clone())
}

fn extract_file(file: &PathBuf, strict: bool, normalize_chart: bool, table: bool, display: bool) -> Result<()> {
    let content = if file.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };

    if display {
        println!("{}", strip_for_display(&content));
        return Ok(());
    }

    let mut result = if strict {
        extract_strict(&content)
    } else {
        extract(&content)
    };
    if normalize_chart {
        result.chart_config = result.chart_config.map(normalize);
    }

    if table {
        let chart = result
            .chart_config
            .as_ref()
            .ok_or_else(|| anyhow!("No chart config found"))?;
        let table = chart
            .to_table()
            .ok_or_else(|| anyhow!("Chart has no category axis or series"))?;
        print!("{}", table.to_csv()?);
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn print_list(title: &str, items: &[String]) {
    println!("\n{}", title.bold().blue());
    println!("{}", "=".repeat(30).dimmed());
    if items.is_empty() {
        println!("{}", "Nothing returned".yellow());
    }
    for item in items {
        println!("  • {}", item.green());
    }
}

fn update_config(api_url: Option<String>, locale: Option<String>) -> Result<()> {
    let path = Config::config_path()?;
    let mut config = Config::load_from(&path)?;
    let changed = api_url.is_some() || locale.is_some();

    if let Some(url) = api_url {
        config.api_base_url = url;
    }
    if let Some(code) = locale {
        config.locale = code.parse::<Locale>()?;
    }
    if changed {
        config.save_to(&path)?;
        println!("{} {}", "Saved".green(), path.display());
    }

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
