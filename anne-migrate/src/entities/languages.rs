use super::keyed;
use crate::context::MigrationContext;
use crate::error::{MigrateError, RowError};
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::EntityKind;
use crate::models::{self, LEGACY_ID};
use anne_core::{Document, MigrationLog};

pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let rows = ctx.source.select_all("language", &["language_id"]).await?;
    let schema = models::languages();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "language_id"), |_, id, row| {
            let code = row.opt_text("code").ok_or_else(|| RowError::InvalidValue {
                column: "code".to_string(),
                reason: "empty language code".to_string(),
            })?;

            let doc = Document::new()
                .field(LEGACY_ID, id)
                .field("name", row.text("name"))
                .field("code", code.to_lowercase())
                .field("locale", row.text("locale"))
                .field("image", row.text("image"))
                .field("directory", row.text("directory"))
                .field("sortOrder", row.int_or("sort_order", 0))
                .field("status", row.flag("status"));

            Ok(RowOutcome::Insert(
                Transformed::new(doc).maps(EntityKind::Language, id),
            ))
        })
        .await
}
