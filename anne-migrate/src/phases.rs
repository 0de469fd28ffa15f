//! Phase orchestration
//!
//! Six phases run in a fixed order. Each phase runs its loaders, verifies the
//! result and records its status. `run_all` stops at the first failed phase.

use crate::context::MigrationContext;
use crate::entities::Entity;
use crate::error::MigrateError;
use crate::loader::LoadStats;
use crate::mapping::EntityKind;
use crate::status::{PhaseStatus, StatusStore};
use crate::validation::Verifier;
use anne_core::MigrationLog;
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Phase1,
    Phase2,
    Phase3,
    Phase4,
    Phase5,
    Phase6,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Phase1,
        Phase::Phase2,
        Phase::Phase3,
        Phase::Phase4,
        Phase::Phase5,
        Phase::Phase6,
    ];

    pub fn number(self) -> u8 {
        match self {
            Phase::Phase1 => 1,
            Phase::Phase2 => 2,
            Phase::Phase3 => 3,
            Phase::Phase4 => 4,
            Phase::Phase5 => 5,
            Phase::Phase6 => 6,
        }
    }

    /// Key of the phase's status record and log file
    pub fn name(self) -> &'static str {
        match self {
            Phase::Phase1 => "phase1",
            Phase::Phase2 => "phase2",
            Phase::Phase3 => "phase3",
            Phase::Phase4 => "phase4",
            Phase::Phase5 => "phase5",
            Phase::Phase6 => "phase6",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Phase::Phase1 => "Reference data",
            Phase::Phase2 => "Categories",
            Phase::Phase3 => "Users",
            Phase::Phase4 => "Products",
            Phase::Phase5 => "Carts and wishlists",
            Phase::Phase6 => "Orders",
        }
    }

    /// Loaders of the phase, in invocation order
    pub fn entities(self) -> &'static [Entity] {
        match self {
            Phase::Phase1 => &[
                Entity::Countries,
                Entity::Zones,
                Entity::Languages,
                Entity::ProductOptions,
            ],
            Phase::Phase2 => &[Entity::Categories],
            Phase::Phase3 => &[Entity::Admins, Entity::Customers],
            Phase::Phase4 => &[Entity::Products],
            Phase::Phase5 => &[Entity::Carts, Entity::Wishlists],
            Phase::Phase6 => &[Entity::Orders],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.name() == s)
            .ok_or_else(|| format!("unknown phase '{s}'"))
    }
}

/// Check that every loader's dependencies are produced by a loader that runs
/// before it
pub fn validate_plan(phases: &[Phase]) -> Result<(), MigrateError> {
    let mut produced: HashSet<EntityKind> = HashSet::new();
    for phase in phases {
        for entity in phase.entities() {
            if let Some(missing) = entity
                .dependencies()
                .iter()
                .find(|dep| !produced.contains(*dep))
            {
                return Err(MigrateError::Plan(format!(
                    "{entity} in {phase} depends on {missing}, which no earlier loader produces"
                )));
            }
            produced.extend(entity.produces().iter().copied());
        }
    }
    Ok(())
}

/// Result of one phase run
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub stats: LoadStats,
    pub error: Option<String>,
    pub duration: Duration,
}

impl PhaseOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == PhaseStatus::Completed
    }
}

/// Runs phases against one migration context
pub struct Migrator {
    ctx: MigrationContext,
    invocations: Vec<Entity>,
    outcomes: Vec<PhaseOutcome>,
}

impl Migrator {
    pub fn new(ctx: MigrationContext) -> Result<Self, MigrateError> {
        validate_plan(&Phase::ALL)?;
        Ok(Self {
            ctx,
            invocations: Vec::new(),
            outcomes: Vec::new(),
        })
    }

    pub fn context(&self) -> &MigrationContext {
        &self.ctx
    }

    /// Loaders invoked so far, in order
    pub fn invocations(&self) -> &[Entity] {
        &self.invocations
    }

    pub fn outcomes(&self) -> &[PhaseOutcome] {
        &self.outcomes
    }

    /// Run a single phase. Returns whether it completed.
    pub async fn run_phase(&mut self, phase: Phase) -> bool {
        let log = self.ctx.log(phase.name());
        let store = self.ctx.store.clone();
        let statuses = StatusStore::new(store.as_ref());
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut stats = LoadStats::default();

        log.info(format!(
            "Starting {phase}: {} ({})",
            phase.description(),
            entity_list(phase)
        ));

        let result = match statuses.mark_in_progress(phase.name(), started_at).await {
            Ok(()) => self.execute(phase, &log, &mut stats).await,
            Err(e) => Err(e),
        };

        let error = result.err().map(|e| e.to_string());
        match &error {
            None => log.info(format!(
                "{phase} completed in {}: processed {}, succeeded {}, failed {}, skipped {}",
                format_duration(timer.elapsed()),
                stats.processed,
                stats.succeeded,
                stats.failed,
                stats.skipped
            )),
            Some(e) => log.error(format!(
                "{phase} failed after {}: {e}",
                format_duration(timer.elapsed())
            )),
        }

        let mut status = if error.is_some() {
            PhaseStatus::Failed
        } else {
            PhaseStatus::Completed
        };
        if let Err(e) = statuses
            .mark_finished(phase.name(), started_at, &stats, error.clone())
            .await
        {
            log.error(format!("Failed to record status of {phase}: {e}"));
            status = PhaseStatus::Failed;
        }

        self.outcomes.push(PhaseOutcome {
            phase,
            status,
            stats,
            error,
            duration: timer.elapsed(),
        });
        status == PhaseStatus::Completed
    }

    /// Run every phase in order, stopping at the first failure
    pub async fn run_all(&mut self) -> bool {
        let pause = Duration::from_millis(self.ctx.settings.phase_pause_ms);
        let mut success = true;

        for (i, phase) in Phase::ALL.into_iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            if !self.run_phase(phase).await {
                error!("Stopping after failed {}", phase);
                success = false;
                break;
            }
        }

        self.print_summary();
        success
    }

    pub fn print_summary(&self) {
        println!("{}", self.summary());
    }

    /// Summary table: one line per phase with its status, counters and duration
    pub fn summary(&self) -> String {
        let mut out = String::from("\n=== Migration Summary ===\n");
        out.push_str(&format!(
            "{:<8} {:<20} {:<10} {:>10} {:>10} {:>8} {:>8} {:>10}\n",
            "Phase", "Description", "Status", "Processed", "Succeeded", "Failed", "Skipped", "Duration"
        ));
        for phase in Phase::ALL {
            match self.outcomes.iter().rev().find(|o| o.phase == phase) {
                Some(outcome) => out.push_str(&format!(
                    "{:<8} {:<20} {:<10} {:>10} {:>10} {:>8} {:>8} {:>10}\n",
                    phase.name(),
                    phase.description(),
                    outcome.status.as_str(),
                    outcome.stats.processed,
                    outcome.stats.succeeded,
                    outcome.stats.failed,
                    outcome.stats.skipped,
                    format_duration(outcome.duration)
                )),
                None => out.push_str(&format!(
                    "{:<8} {:<20} {:<10}\n",
                    phase.name(),
                    phase.description(),
                    "not run"
                )),
            }
        }
        for outcome in self.outcomes.iter().filter(|o| o.error.is_some()) {
            out.push_str(&format!(
                "{} error: {}\n",
                outcome.phase,
                outcome.error.as_deref().unwrap_or_default()
            ));
        }
        out.push_str(&format!("Total duration: {}\n", format_duration(self.total_duration())));
        out.push_str("=========================\n");
        out
    }

    /// Sum of the durations of every phase run so far
    pub fn total_duration(&self) -> Duration {
        self.outcomes.iter().map(|o| o.duration).sum()
    }

    async fn execute(
        &mut self,
        phase: Phase,
        log: &MigrationLog,
        stats: &mut LoadStats,
    ) -> Result<(), MigrateError> {
        for entity in phase.entities() {
            self.prepare(*entity).await?;
            self.invocations.push(*entity);

            let entity_log = self.ctx.log(entity.name());
            let entity_stats = entity.load(&mut self.ctx, &entity_log).await?;
            log.info(format!(
                "{entity}: processed {}, succeeded {}, failed {}, skipped {}",
                entity_stats.processed,
                entity_stats.succeeded,
                entity_stats.failed,
                entity_stats.skipped
            ));
            stats.merge(&entity_stats);
        }

        let source = self.ctx.source.clone();
        let store = self.ctx.store.clone();
        Verifier::new(source.as_ref(), store.as_ref(), &self.ctx.verification, log)
            .verify_all(phase.entities())
            .await?;
        Ok(())
    }

    /// Rebuild mappings a loader needs that this process has not produced,
    /// so a phase can run on its own after earlier phases ran elsewhere
    async fn prepare(&mut self, entity: Entity) -> Result<(), MigrateError> {
        for dep in entity.dependencies() {
            if self.ctx.mappings.is_empty(*dep) {
                let loaded = self.ctx.hydrate(*dep).await?;
                if loaded == 0 {
                    info!("No {} mappings available for {}", dep, entity);
                }
            }
        }
        Ok(())
    }
}

pub fn format_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

fn entity_list(phase: Phase) -> String {
    phase
        .entities()
        .iter()
        .map(|e| e.name())
        .collect::<Vec<_>>()
        .join(", ")
}
