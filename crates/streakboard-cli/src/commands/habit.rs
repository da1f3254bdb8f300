//! Habit commands for CLI.

use clap::Subcommand;
use streakboard_core::{Frequency, NewHabit};

use super::Context;

#[derive(Subcommand)]
pub enum HabitAction {
    /// Create a new habit
    Create {
        /// Habit name
        name: String,
        /// Habit description
        #[arg(long)]
        description: Option<String>,
        /// Free-form category
        #[arg(long)]
        category: Option<String>,
        /// daily or weekly (default: daily)
        #[arg(long, default_value = "daily")]
        frequency: Frequency,
    },
    /// List habits, reconciled against today
    List,
    /// Get habit details
    Get {
        /// Habit ID
        id: String,
    },
    /// Mark today complete, or undo today's completion
    Toggle {
        /// Habit ID
        id: String,
    },
    /// Delete a habit
    Delete {
        /// Habit ID
        id: String,
    },
    /// Dashboard counters for today
    Summary,
}

pub fn run(ctx: &Context, action: HabitAction) -> Result<(), Box<dyn std::error::Error>> {
    let svc = ctx.service()?;

    match action {
        HabitAction::Create {
            name,
            description,
            category,
            frequency,
        } => {
            let habit = svc.create(
                ctx.user_id(),
                NewHabit {
                    name,
                    description,
                    category,
                    frequency,
                },
            )?;
            println!("Habit created: {}", habit.id);
            println!("{}", serde_json::to_string_pretty(&habit)?);
        }
        HabitAction::List => {
            let listing = svc.habits_for(ctx.user_id())?;
            println!("{}", serde_json::to_string_pretty(&listing.habits)?);
            if !listing.failed.is_empty() {
                for (id, message) in &listing.failed {
                    eprintln!("{id}: {message}");
                }
                return Err(format!(
                    "{} habit(s) shown with unsaved streak updates",
                    listing.failed.len()
                )
                .into());
            }
        }
        HabitAction::Get { id } => {
            let habit = svc.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&habit)?);
        }
        HabitAction::Toggle { id } => {
            let habit = svc.toggle(&id)?;
            println!("{}", serde_json::to_string_pretty(&habit)?);
        }
        HabitAction::Delete { id } => {
            svc.delete(&id)?;
            println!("Habit deleted: {id}");
        }
        HabitAction::Summary => {
            let summary = svc.summary(ctx.user_id())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
