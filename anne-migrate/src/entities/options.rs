use super::{descriptions, group_by, keyed};
use crate::context::MigrationContext;
use crate::error::{MigrateError, RowError};
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::EntityKind;
use crate::models::{self, LEGACY_ID};
use anne_core::{object, Document, MigrationLog, Value};

/// Product options with their values embedded
pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let language = ctx.default_language().await?;
    let source = ctx.source.clone();

    let rows = source.select_all("option", &["option_id"]).await?;
    let names = descriptions(
        source.select_all("option_description", &["option_id"]).await?,
        "option_id",
        language.source_id,
    );
    let values = group_by(
        source
            .select_all("option_value", &["option_id", "sort_order", "option_value_id"])
            .await?,
        "option_id",
    );
    let value_names = descriptions(
        source
            .select_all("option_value_description", &["option_value_id"])
            .await?,
        "option_value_id",
        language.source_id,
    );
    let schema = models::product_options();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "option_id"), |_, id, row| {
            let name = names
                .get(&id)
                .and_then(|d| d.opt_text("name"))
                .ok_or_else(|| RowError::InvalidValue {
                    column: "name".to_string(),
                    reason: format!("option {id} has no description"),
                })?;

            let option_values: Vec<Value> = values
                .get(&id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(|value| {
                    let value_id = value.int_or("option_value_id", 0);
                    object([
                        (LEGACY_ID, Value::Int64(value_id)),
                        (
                            "name",
                            value_names
                                .get(&value_id)
                                .map(|d| d.text("name"))
                                .unwrap_or_default()
                                .into(),
                        ),
                        ("image", value.text("image").into()),
                        ("sortOrder", value.int_or("sort_order", 0).into()),
                    ])
                })
                .collect();

            let doc = Document::new()
                .field(LEGACY_ID, id)
                .field("type", row.text("type"))
                .field("name", name)
                .field("sortOrder", row.int_or("sort_order", 0))
                .field("values", option_values);

            Ok(RowOutcome::Insert(
                Transformed::new(doc).maps(EntityKind::ProductOption, id),
            ))
        })
        .await
}
