use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::postgres::PgPoolOptions;

mod aggregate;
mod db;
mod error;
mod features;
mod inference;
mod ingest;
mod models;
mod recommend;
mod weekly;

#[derive(Parser)]
#[command(name = "vitals-fatigue-pipeline")]
#[command(about = "Physiological sample aggregation and fatigue-risk pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Serialized model artifact (loaded once at startup)
    #[arg(long, default_value = "models/fatigue_model_v1.json")]
    model: PathBuf,
    /// Ordered feature-name manifest matching the model input
    #[arg(long, default_value = "models/fatigue_model_v1_features.json")]
    features: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Ingest one sample payload (JSON file, or '-' for stdin)
    Ingest {
        #[arg(long)]
        json: PathBuf,
    },
    /// Bulk-import raw samples from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Recompute the aggregate for one user-day and score it
    Aggregate {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        date: NaiveDate,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Recompute today's aggregate (UTC) for a user
    Rebuild {
        #[arg(long)]
        user_id: i64,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Roll the week ending at a date into a fatigue summary
    Weekly {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        week_end: NaiveDate,
    },
    /// Show the stored aggregate for one user-day without recomputing
    ShowAggregate {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        date: NaiveDate,
    },
    /// List the latest recommendations for a user
    Recommendations {
        #[arg(long)]
        user_id: i64,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Ingest { json } => {
            let raw = if json.as_os_str() == "-" {
                let mut buffer = String::new();
                std::io::stdin().read_to_string(&mut buffer)?;
                buffer
            } else {
                std::fs::read_to_string(&json)
                    .with_context(|| format!("cannot read {}", json.display()))?
            };
            let payload = ingest::parse_payload(&raw)?;
            let sample = ingest::ingest_sample(&pool, &payload).await?;
            println!(
                "Sample {} stored for user {} on {}.",
                sample.sample_id, sample.user_id, sample.day
            );
        }
        Commands::Import { csv } => {
            let inserted = db::import_samples_csv(&pool, &csv).await?;
            println!("Inserted {inserted} samples from {}.", csv.display());
        }
        Commands::Aggregate {
            user_id,
            date,
            model,
        } => {
            let client = load_client(&model)?;
            let mut rng = StdRng::from_entropy();
            let agg =
                aggregate::aggregate_day(&pool, &client, &mut rng, user_id, date).await?;
            print_aggregate(&agg);
        }
        Commands::Rebuild { user_id, model } => {
            let client = load_client(&model)?;
            let mut rng = StdRng::from_entropy();
            let today = chrono::Utc::now().date_naive();
            let agg =
                aggregate::aggregate_day(&pool, &client, &mut rng, user_id, today).await?;
            print_aggregate(&agg);
        }
        Commands::Weekly { user_id, week_end } => {
            let message = weekly::summarize_week(&pool, user_id, week_end).await?;
            println!(
                "{}",
                serde_json::json!({
                    "userId": user_id,
                    "weekEnd": week_end,
                    "message": message,
                })
            );
        }
        Commands::ShowAggregate { user_id, date } => {
            match db::find_aggregate(&pool, user_id, date).await? {
                Some(agg) => print_aggregate(&agg),
                None => println!("No aggregate for user {user_id} on {date}."),
            }
        }
        Commands::Recommendations { user_id, limit } => {
            let recs = db::fetch_recommendations(&pool, user_id, limit).await?;
            if recs.is_empty() {
                println!("No recommendations for user {user_id}.");
            } else {
                for rec in recs {
                    println!(
                        "- [{}] {} ({}) on {}: {}",
                        rec.severity, rec.source, rec.rec_id, rec.created_at, rec.rec_text
                    );
                }
            }
        }
    }

    Ok(())
}

/// Startup precondition: missing or inconsistent model artifacts are fatal.
fn load_client(args: &ModelArgs) -> anyhow::Result<inference::InferenceClient> {
    let client = inference::InferenceClient::load(&args.model, &args.features)
        .context("model artifacts must be loadable at startup")?;
    tracing::info!(
        model = client.model_name(),
        version = client.model_version(),
        features = client.manifest().len(),
        "inference model loaded"
    );
    Ok(client)
}

fn print_aggregate(agg: &models::DailyAggregate) {
    println!(
        "Aggregate for user {} on {}: steps {}, calories {:.1}, hr mean {:.1}, hr max {}, sleep {:.1}h, d_steps_7d {:.2}, d_sleep_7d {:.2}",
        agg.user_id,
        agg.date,
        agg.steps_total,
        agg.calories_total,
        agg.hr_mean,
        agg.hr_max,
        agg.sleep_hours_total,
        agg.d_steps_7d,
        agg.d_sleep_7d
    );
}
