pub mod config;
pub mod habit;
pub mod maintain;

use chrono::NaiveDate;
use streakboard_core::{Clock, Config, FixedClock, HabitDb, HabitService, SystemClock};

/// Clock chosen from `--today` or the configured system clock.
pub enum CliClock {
    Fixed(FixedClock),
    System(SystemClock),
}

impl Clock for CliClock {
    fn today(&self) -> NaiveDate {
        match self {
            CliClock::Fixed(c) => c.today(),
            CliClock::System(c) => c.today(),
        }
    }
}

/// Settings shared by every command.
pub struct Context {
    pub config: Config,
    pub today: Option<NaiveDate>,
}

impl Context {
    pub fn new(config: Config, today: Option<NaiveDate>) -> Self {
        Self { config, today }
    }

    pub fn clock(&self) -> CliClock {
        match self.today {
            Some(day) => CliClock::Fixed(FixedClock(day)),
            None => CliClock::System(self.config.system_clock()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.config.user.id
    }

    pub fn service(&self) -> Result<HabitService<HabitDb, CliClock>, Box<dyn std::error::Error>> {
        let db = HabitDb::open()?;
        Ok(HabitService::new(db, self.clock()).with_max_retries(self.config.engine.max_retries))
    }
}
