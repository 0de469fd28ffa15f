use super::{descriptions, keyed};
use crate::context::MigrationContext;
use crate::error::MigrateError;
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::EntityKind;
use crate::models::{self, LEGACY_ID};
use anne_core::{Document, MigrationLog, ObjectId, Value};
use std::collections::HashMap;

/// Categories. Ids are generated up front so a parent resolves no matter
/// where it appears in the source order.
pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let language = ctx.default_language().await?;
    let rows = ctx.source.select_all("category", &["category_id"]).await?;
    let texts = descriptions(
        ctx.source
            .select_all("category_description", &["category_id"])
            .await?,
        "category_id",
        language.source_id,
    );

    let ids: HashMap<i64, ObjectId> = rows
        .iter()
        .map(|row| (row.int_or("category_id", 0), ObjectId::new()))
        .collect();
    let schema = models::categories();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "category_id"), |_, id, row| {
            let parent_id = row.int_or("parent_id", 0);
            let parent = match parent_id {
                0 => None,
                _ => {
                    let parent = ids.get(&parent_id).copied();
                    if parent.is_none() {
                        log.warn(format!(
                            "Category {id}: parent category {parent_id} not found, stored as null"
                        ));
                    }
                    parent
                }
            };

            let text = texts.get(&id);
            let field = |column: &str| text.map(|d| d.text(column)).unwrap_or_default();
            if text.is_none() {
                log.warn(format!("Category {id}: no description found"));
            }

            let doc = Document::with_id(ids.get(&id).copied().unwrap_or_else(ObjectId::new))
                .field(LEGACY_ID, id)
                .field("name", field("name"))
                .field("description", field("description"))
                .field("metaTitle", field("meta_title"))
                .field("metaDescription", field("meta_description"))
                .field("metaKeyword", field("meta_keyword"))
                .field("image", row.opt_text("image"))
                .field("parent", parent)
                .field("top", row.flag("top"))
                .field("column", row.int_or("column", 0))
                .field("sortOrder", row.int_or("sort_order", 0))
                .field("status", row.flag("status"))
                .field("language", Value::ObjectId(language.id))
                .field("createdAt", row.datetime_value("date_added"))
                .field("updatedAt", row.datetime_value("date_modified"));

            Ok(RowOutcome::Insert(
                Transformed::new(doc).maps(EntityKind::Category, id),
            ))
        })
        .await
}
