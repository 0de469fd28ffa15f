use super::keyed;
use crate::context::MigrationContext;
use crate::error::MigrateError;
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::EntityKind;
use crate::models::{self, LEGACY_ID};
use anne_core::{Document, MigrationLog};

/// Zones whose country was not migrated are skipped entirely
pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let rows = ctx.source.select_all("zone", &["zone_id"]).await?;
    let schema = models::zones();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "zone_id"), |mappings, id, row| {
            let country_id = row.int("country_id")?;
            let Some(country) = mappings.get(EntityKind::Country, country_id) else {
                return Ok(RowOutcome::Skip(format!(
                    "zone '{}' references missing country {}",
                    row.text("name"),
                    country_id
                )));
            };

            let doc = Document::new()
                .field(LEGACY_ID, id)
                .field("country", country)
                .field("name", row.text("name"))
                .field("code", row.text("code"))
                .field("status", row.flag("status"));

            Ok(RowOutcome::Insert(Transformed::new(doc).maps(EntityKind::Zone, id)))
        })
        .await
}
