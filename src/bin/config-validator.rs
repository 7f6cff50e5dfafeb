//! # Pipeline Configuration Validator
//!
//! Command-line tool for validating pipeline engine configuration files across
//! environments before a task manager is started with them.

use clap::{Parser, Subcommand, ValueEnum};
use pipeline_core::config::{ConfigManager, EngineConfig, StageConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate pipeline engine configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment overlay to apply (development, test, production, ...)
    #[arg(short, long, env = "PIPELINE_ENV", default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config/pipeline)
    #[arg(short, long, env = "PIPELINE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configuration section
    All,

    /// Validate a single section
    Section {
        /// Section name (reader, processor, writer, buffer, dispatcher, reporter, registry, execution)
        name: String,
    },

    /// Print the effective configuration
    Show {
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// List environment overlays found in the configuration directory
    Environments,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all_config(&cli),
        Some(Commands::Section { name }) => validate_section(&cli, name),
        Some(Commands::Show { format }) => show_config(&cli, *format),
        Some(Commands::Environments) => list_environments(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)?;
    Ok(manager.config().clone())
}

fn validate_all_config(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Pipeline Configuration");
    println!("Environment: {}", cli.environment);
    if let Some(config_dir) = &cli.config_dir {
        println!("Config Directory: {}", config_dir.display());
    }
    println!();

    let config = match load(cli) {
        Ok(config) => {
            println!("✅ Configuration loaded and EngineConfig struct created successfully");
            config
        }
        Err(e) => {
            println!("❌ Failed to load configuration: {e}");
            println!("   This is the same error a task manager would encounter");
            return Err(e);
        }
    };

    for section in SECTIONS {
        describe_section(&config, section)?;
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

const SECTIONS: [&str; 8] = [
    "reader",
    "processor",
    "writer",
    "buffer",
    "dispatcher",
    "reporter",
    "registry",
    "execution",
];

fn validate_section(cli: &Cli, name: &str) -> anyhow::Result<()> {
    println!("🔧 Validating Section: {name}");
    let config = load(cli)?;
    describe_section(&config, &name.to_lowercase())?;
    println!("✅ Section '{name}' validation passed!");
    Ok(())
}

fn describe_section(config: &EngineConfig, name: &str) -> anyhow::Result<()> {
    match name {
        "reader" => describe_stage("📥", name, &config.reader),
        "processor" => describe_stage("⚙️ ", name, &config.processor),
        "writer" => describe_stage("📤", name, &config.writer),
        "buffer" => {
            println!("🧺 Buffer");
            println!("   ✅ Capacity: {}", config.buffer.buffer_size);
        }
        "dispatcher" => {
            println!("📡 Dispatcher");
            println!("   ✅ Pending warning limit: {}", config.dispatcher.buffer_size);
        }
        "reporter" => {
            println!("📊 Reporter");
            println!("   ✅ Report period: {}s", config.reporter.report_period_seconds);
            println!("   ✅ Tick: {}ms", config.reporter.tick_ms);
        }
        "registry" => {
            println!("🗂️  Registry");
            println!("   ✅ Initial capacity: {}", config.registry.initial_capacity);
            match config.registry.maximum_size {
                Some(maximum) => println!("   ✅ Maximum size: {maximum}"),
                None => println!("   ℹ️  Maximum size: unbounded"),
            }
            println!("   ✅ Timeout: {}s", config.registry.timeout_seconds);
        }
        "execution" => {
            println!("🏃 Execution");
            println!("   ✅ Idle poll: {}ms", config.execution.idle_poll_ms);
        }
        other => anyhow::bail!("Unknown section: {other}"),
    }
    Ok(())
}

fn describe_stage(icon: &str, name: &str, stage: &StageConfig) {
    println!("{icon} Stage '{name}'");
    println!(
        "   ✅ Produce retry: {} attempts, {}ms per attempt",
        stage.produce_retry_times, stage.produce_wait_ms
    );
    println!("   ✅ Max consume count: {}", stage.max_consume_count);
    if stage.interrupt_for.is_empty() {
        println!("   ℹ️  No interrupting error categories (every stage error is a warning)");
    } else {
        let mut categories: Vec<String> = stage.interrupt_for.iter().map(ToString::to_string).collect();
        categories.sort();
        println!("   ✅ Interrupt for: {}", categories.join(", "));
    }
}

fn show_config(cli: &Cli, format: OutputFormat) -> anyhow::Result<()> {
    let config = load(cli)?;
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&config)?,
        OutputFormat::Yaml => serde_yaml::to_string(&config)?,
    };
    println!("{rendered}");
    Ok(())
}

fn list_environments(cli: &Cli) -> anyhow::Result<()> {
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("config").join("pipeline"));
    println!("📋 Available Environments in {}:", config_dir.display());

    if !config_dir.exists() {
        println!("❌ Configuration directory not found");
        return Ok(());
    }

    let mut environments = Vec::new();
    for entry in std::fs::read_dir(&config_dir)? {
        let path = entry?.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if is_yaml && stem != "base" {
                environments.push(stem.to_string());
            }
        }
    }
    environments.sort();

    for env in environments {
        println!("  • {env}");
    }
    Ok(())
}
