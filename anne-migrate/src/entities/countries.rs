use super::keyed;
use crate::context::MigrationContext;
use crate::error::MigrateError;
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::EntityKind;
use crate::models::{self, LEGACY_ID};
use anne_core::{Document, MigrationLog};

pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let rows = ctx.source.select_all("country", &["country_id"]).await?;
    let schema = models::countries();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "country_id"), |_, id, row| {
            let doc = Document::new()
                .field(LEGACY_ID, id)
                .field("name", row.text("name"))
                .field("isoCode2", row.text("iso_code_2"))
                .field("isoCode3", row.text("iso_code_3"))
                .field("addressFormat", row.text("address_format"))
                .field("postcodeRequired", row.flag("postcode_required"))
                .field("status", row.flag("status"));

            Ok(RowOutcome::Insert(
                Transformed::new(doc).maps(EntityKind::Country, id),
            ))
        })
        .await
}
