//! Factory Production Planner
//!
//! A production chain planner for factory building games.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;

use factory_planner::calculator::{self, Plan};
use factory_planner::lp::MinilpBackend;
use factory_planner::models::Objective;
use factory_planner::settings::{DisplayRate, Settings};
use factory_planner::solver::{Failure, ResultType};
use factory_planner::{db, import, logging, sample};

#[derive(Parser)]
#[command(name = "factory-planner")]
#[command(about = "Production chain planner for factory building games")]
struct Cli {
    /// Path to the SQLite database
    #[arg(short, long, default_value = "factory_data.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import JSON dataset files from a directory
    Import {
        /// Directory to scan for *.json dataset files
        source_dir: PathBuf,

        /// Clear existing data before import
        #[arg(long)]
        clear: bool,
    },

    /// Solve a production plan
    Solve {
        /// Objectives as type:target=value[@unit], e.g. output:iron-plate=60
        #[arg(required = true)]
        objectives: Vec<Objective>,

        /// JSON settings file
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Display rate, overriding the settings file
        #[arg(short, long, value_enum)]
        rate: Option<DisplayRate>,

        /// Show every step of the plan
        #[arg(short, long)]
        verbose: bool,
    },

    /// List all items in the database
    ListItems,

    /// List all recipes in the database
    ListRecipes,

    /// Show details for a specific item
    Item {
        /// Item ID
        id: String,
    },

    /// Initialize empty database with schema
    Init,

    /// Load the built-in sample dataset
    LoadSample,
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let mut conn = Connection::open(&cli.database)
        .with_context(|| format!("Failed to open {}", cli.database.display()))?;
    db::init_schema(&conn)?;

    match cli.command {
        Commands::Import { source_dir, clear } => {
            let stats = import::import_to_database(&mut conn, &source_dir, clear)?;
            println!("{}", stats);
        }

        Commands::Solve {
            objectives,
            settings,
            rate,
            verbose,
        } => {
            let mut settings = match settings {
                Some(path) => Settings::from_path(path)?,
                None => Settings::default(),
            };
            if let Some(rate) = rate {
                settings.display_rate = rate;
            }

            let dataset = db::load_dataset(&conn)?;
            if dataset.items.is_empty() {
                println!("No items in database. Run 'import' or 'load-sample' first.");
                return Ok(());
            }

            let plan = calculator::calculate(&dataset, &settings, &objectives, &MinilpBackend)?;
            print_result(&plan);

            if plan.result_type == ResultType::Solved {
                if verbose {
                    println!("Production steps:\n");
                    println!("{}", calculator::format_steps(&plan, &dataset, &settings));
                }
                println!("{}", calculator::summarize_plan(&plan));
            }
        }

        Commands::ListItems => {
            let items = db::list_items(&conn)?;
            if items.is_empty() {
                println!("No items in database. Run 'import' or 'load-sample' first.");
            } else {
                println!("{:<30} {:<30} {:<15}", "Item", "ID", "Category");
                println!("{}", "-".repeat(75));
                for item in items {
                    println!("{:<30} {:<30} {:<15}", item.name, item.id, item.category);
                }
            }
        }

        Commands::ListRecipes => {
            let recipes = db::list_recipes(&conn)?;
            if recipes.is_empty() {
                println!("No recipes in database. Run 'import' or 'load-sample' first.");
            } else {
                println!("{:<30} {:<30} {:>10}", "Recipe", "ID", "Time (s)");
                println!("{}", "-".repeat(72));
                for (id, name, time) in recipes {
                    println!("{:<30} {:<30} {:>10}", name, id, time.to_string());
                }
            }
        }

        Commands::Item { id } => {
            let dataset = db::load_dataset(&conn)?;
            let Ok(item) = dataset.item(&id) else {
                println!("Item '{}' not found", id);
                return Ok(());
            };

            println!("Item: {}", item.name);
            println!("  ID: {}", item.id);
            println!("  Category: {}", item.category);
            if let Some(stack) = &item.stack {
                println!("  Stack size: {}", stack);
            }
            if let Some(machine) = &item.machine {
                let speed = machine.speed.as_ref().map_or("belt".to_string(), |s| s.to_string());
                println!("  Machine: speed {}, {:?}", speed, machine.energy);
            }
            if let Some(fuel) = &item.fuel {
                println!("  Fuel: {} MJ ({})", fuel.value, fuel.category);
            }
            if let Some(belt) = &item.belt {
                println!("  Belt: {}/s", belt.speed);
            }

            let producers = db::get_producers(&conn, &id)?;
            if !producers.is_empty() {
                println!("  Produced by:");
                for (recipe, amount) in producers {
                    println!("    {} ({} per cycle)", recipe, amount);
                }
            }

            let consumers = db::get_consumers(&conn, &id)?;
            if !consumers.is_empty() {
                println!("  Consumed by:");
                for (recipe, amount) in consumers {
                    println!("    {} ({} per cycle)", recipe, amount);
                }
            }
        }

        Commands::Init => {
            println!("Database initialized at: {}", cli.database.display());
        }

        Commands::LoadSample => {
            let dataset = sample::sample_dataset();
            db::save_dataset(&mut conn, &dataset)?;
            println!(
                "Loaded {} sample items and {} recipes",
                dataset.items.len(),
                dataset.recipes.len()
            );
        }
    }

    Ok(())
}

fn print_result(plan: &Plan) {
    let meta = &plan.metadata;
    match &plan.result_type {
        ResultType::Solved => println!(
            "Solved with {} in {:.1} ms ({} variables, {} constraints)\n",
            meta.backend,
            meta.elapsed.as_secs_f64() * 1000.0,
            meta.variables,
            meta.constraints
        ),
        ResultType::Skipped => println!("Nothing to solve"),
        ResultType::Paused => println!("Solving is paused"),
        ResultType::Failed(Failure::Infeasible) => {
            println!("No feasible plan: the limits cannot be met")
        }
        ResultType::Failed(Failure::Unbounded { targets }) => {
            println!("Plan is unbounded; add a limit for: {}", targets.join(", "))
        }
        ResultType::Failed(Failure::SolverError { code, message }) => {
            println!("Solver error {}: {}", code, message)
        }
    }
}
