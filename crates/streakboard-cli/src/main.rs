use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use streakboard_core::Config;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "streakboard", version, about = "Streakboard habit streak CLI")]
struct Cli {
    /// Treat this date (YYYY-MM-DD) as today instead of the system date
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Habit management and completion toggles
    Habit {
        #[command(subcommand)]
        action: commands::habit::HabitAction,
    },
    /// Reconcile every stored habit (scheduled maintenance)
    Maintain,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_env("STREAKBOARD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load_or_default();
    init_tracing(&config);

    let ctx = commands::Context::new(config, cli.today);
    tracing::debug!(user_id = ctx.user_id(), today = ?ctx.today, "starting");
    let result = match cli.command {
        Commands::Habit { action } => commands::habit::run(&ctx, action),
        Commands::Maintain => commands::maintain::run(&ctx),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
