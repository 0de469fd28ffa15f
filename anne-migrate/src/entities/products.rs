use super::{descriptions, group_by, keyed};
use crate::context::MigrationContext;
use crate::error::MigrateError;
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::EntityKind;
use crate::models::{self, LEGACY_ID};
use anne_core::{object, Document, MigrationLog, ObjectId, Value};

/// Products with category references, images and option values embedded
pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let language = ctx.default_language().await?;
    let source = ctx.source.clone();

    let rows = source.select_all("product", &["product_id"]).await?;
    let texts = descriptions(
        source
            .select_all("product_description", &["product_id"])
            .await?,
        "product_id",
        language.source_id,
    );
    let categories = group_by(
        source
            .select_all("product_to_category", &["product_id", "category_id"])
            .await?,
        "product_id",
    );
    let images = group_by(
        source
            .select_all("product_image", &["product_id", "sort_order", "product_image_id"])
            .await?,
        "product_id",
    );
    let option_values = group_by(
        source
            .select_all("product_option_value", &["product_id", "product_option_value_id"])
            .await?,
        "product_id",
    );
    let value_names = descriptions(
        source
            .select_all("option_value_description", &["option_value_id"])
            .await?,
        "option_value_id",
        language.source_id,
    );
    let schema = models::products();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "product_id"), |mappings, id, row| {
            let context = format!("Product {id}");
            let text = texts.get(&id);
            if text.is_none() {
                log.warn(format!("{context}: no description found"));
            }
            let field = |column: &str| text.map(|d| d.text(column)).unwrap_or_default();

            let tags: Vec<Value> = field("tag")
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(Value::from)
                .collect();

            let category_refs: Vec<Value> = categories
                .get(&id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(|link| {
                    mappings
                        .resolve(
                            EntityKind::Category,
                            link.int_or("category_id", 0),
                            log,
                            &context,
                        )
                        .into()
                })
                .collect();

            let gallery: Vec<Value> = images
                .get(&id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|image| {
                    let path = image.opt_text("image")?;
                    Some(object([
                        ("path", Value::from(path)),
                        ("sortOrder", image.int_or("sort_order", 0).into()),
                    ]))
                })
                .collect();

            let mut transformed_mappings = Vec::new();
            let options: Vec<Value> = option_values
                .get(&id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(|pov| {
                    let pov_id = pov.int_or("product_option_value_id", 0);
                    let embedded_id = ObjectId::new();
                    transformed_mappings.push((pov_id, embedded_id));
                    let option_value_id = pov.int_or("option_value_id", 0);
                    object([
                        ("_id", Value::ObjectId(embedded_id)),
                        (LEGACY_ID, Value::Int64(pov_id)),
                        ("productOptionId", pov.int_or("product_option_id", 0).into()),
                        (
                            "option",
                            mappings
                                .resolve(
                                    EntityKind::ProductOption,
                                    pov.int_or("option_id", 0),
                                    log,
                                    &context,
                                )
                                .into(),
                        ),
                        ("optionValueId", option_value_id.into()),
                        (
                            "name",
                            value_names
                                .get(&option_value_id)
                                .map(|d| d.text("name"))
                                .unwrap_or_default()
                                .into(),
                        ),
                        ("quantity", pov.int_or("quantity", 0).into()),
                        ("subtract", pov.flag("subtract").into()),
                        ("price", pov.float("price").into()),
                        ("pricePrefix", pov.text("price_prefix").into()),
                        ("points", pov.int_or("points", 0).into()),
                        ("weight", pov.float("weight").into()),
                        ("weightPrefix", pov.text("weight_prefix").into()),
                    ])
                })
                .collect();

            let doc = Document::new()
                .field(LEGACY_ID, id)
                .field("name", field("name"))
                .field("description", field("description"))
                .field("tags", tags)
                .field("metaTitle", field("meta_title"))
                .field("metaDescription", field("meta_description"))
                .field("metaKeyword", field("meta_keyword"))
                .field("model", row.text("model"))
                .field("sku", row.text("sku"))
                .field("quantity", row.int_or("quantity", 0))
                .field("price", row.float("price"))
                .field("status", row.flag("status"))
                .field("image", row.opt_text("image"))
                .field("images", gallery)
                .field("categories", category_refs)
                .field("options", options)
                .field("language", language.id)
                .field("weight", row.float("weight"))
                .field(
                    "dimensions",
                    object([
                        ("length", row.float("length").into()),
                        ("width", row.float("width").into()),
                        ("height", row.float("height").into()),
                    ]),
                )
                .field("viewed", row.int_or("viewed", 0))
                .field("dateAvailable", row.datetime_value("date_available"))
                .field("createdAt", row.datetime_value("date_added"))
                .field("updatedAt", row.datetime_value("date_modified"));

            let transformed = transformed_mappings.into_iter().fold(
                Transformed::new(doc).maps(EntityKind::Product, id),
                |t, (pov_id, embedded_id)| {
                    t.maps_embedded(EntityKind::ProductOptionValue, pov_id, embedded_id)
                },
            );
            Ok(RowOutcome::Insert(transformed))
        })
        .await
}
