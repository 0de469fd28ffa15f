use super::{group_by, keyed};
use crate::context::MigrationContext;
use crate::error::MigrateError;
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::EntityKind;
use crate::models::{self, order_status_name, LEGACY_ID};
use crate::source::SourceRow;
use anne_core::{object, Document, MigrationLog, ObjectId, Value};

/// Orders with line items, item options, totals and status history embedded
pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let language = ctx.default_language().await?;
    let source = ctx.source.clone();

    let rows = source.select_all("order", &["order_id"]).await?;
    let items = group_by(
        source
            .select_all("order_product", &["order_id", "order_product_id"])
            .await?,
        "order_id",
    );
    let item_options = group_by(
        source
            .select_all("order_option", &["order_product_id", "order_option_id"])
            .await?,
        "order_product_id",
    );
    let totals = group_by(
        source
            .select_all("order_total", &["order_id", "sort_order", "order_total_id"])
            .await?,
        "order_id",
    );
    let history = group_by(
        source
            .select_all("order_history", &["order_id", "date_added", "order_history_id"])
            .await?,
        "order_id",
    );
    let schema = models::orders();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "order_id"), |mappings, id, row| {
            let context = format!("Order {id}");
            let customer =
                mappings.resolve(EntityKind::Customer, row.int_or("customer_id", 0), log, &context);
            let order_language = mappings
                .resolve(EntityKind::Language, row.int_or("language_id", 0), log, &context)
                .unwrap_or(language.id);

            let line_items: Vec<Value> = rows_of(&items, id)
                .iter()
                .map(|item| {
                    let item_id = item.int_or("order_product_id", 0);
                    let options: Vec<Value> = rows_of(&item_options, item_id)
                        .iter()
                        .map(|option| {
                            object([
                                (LEGACY_ID, option.int_or("order_option_id", 0).into()),
                                (
                                    "productOptionValue",
                                    mappings
                                        .resolve(
                                            EntityKind::ProductOptionValue,
                                            option.int_or("product_option_value_id", 0),
                                            log,
                                            &context,
                                        )
                                        .into(),
                                ),
                                ("name", option.text("name").into()),
                                ("value", option.text("value").into()),
                                ("type", option.text("type").into()),
                            ])
                        })
                        .collect();

                    object([
                        ("_id", Value::ObjectId(ObjectId::new())),
                        (LEGACY_ID, item_id.into()),
                        (
                            "product",
                            mappings
                                .resolve(
                                    EntityKind::Product,
                                    item.int_or("product_id", 0),
                                    log,
                                    &context,
                                )
                                .into(),
                        ),
                        ("name", item.text("name").into()),
                        ("model", item.text("model").into()),
                        ("quantity", item.int_or("quantity", 0).into()),
                        ("price", item.float("price").into()),
                        ("total", item.float("total").into()),
                        ("tax", item.float("tax").into()),
                        ("reward", item.int_or("reward", 0).into()),
                        ("options", Value::Array(options)),
                    ])
                })
                .collect();

            let order_totals: Vec<Value> = rows_of(&totals, id)
                .iter()
                .map(|total| {
                    object([
                        ("code", total.text("code").into()),
                        ("title", total.text("title").into()),
                        ("value", total.float("value").into()),
                        ("sortOrder", total.int_or("sort_order", 0).into()),
                    ])
                })
                .collect();

            let status_history: Vec<Value> = rows_of(&history, id)
                .iter()
                .map(|entry| {
                    let status_id = entry.int_or("order_status_id", 0);
                    object([
                        ("status", order_status_name(status_id).into()),
                        ("statusId", status_id.into()),
                        ("notify", entry.flag("notify").into()),
                        ("comment", entry.text("comment").into()),
                        ("createdAt", entry.datetime_value("date_added")),
                    ])
                })
                .collect();

            let status_id = row.int_or("order_status_id", 0);
            let invoice = match row.int_or("invoice_no", 0) {
                0 => String::new(),
                no => format!("{}{}", row.text("invoice_prefix"), no),
            };

            let doc = Document::new()
                .field(LEGACY_ID, id)
                .field("invoiceNo", invoice)
                .field("customer", customer)
                .field(
                    "customerInfo",
                    object([
                        ("firstName", row.text("firstname").into()),
                        ("lastName", row.text("lastname").into()),
                        ("email", row.text("email").into()),
                        ("telephone", row.text("telephone").into()),
                    ]),
                )
                .field("paymentAddress", address(row, "payment"))
                .field("paymentMethod", row.text("payment_method"))
                .field("shippingAddress", address(row, "shipping"))
                .field("shippingMethod", row.text("shipping_method"))
                .field("comment", row.text("comment"))
                .field("total", row.float("total"))
                .field("status", order_status_name(status_id))
                .field("statusId", status_id)
                .field("products", line_items)
                .field("totals", order_totals)
                .field("history", status_history)
                .field("language", order_language)
                .field(
                    "currency",
                    object([
                        ("code", row.text("currency_code").into()),
                        ("value", row.float("currency_value").into()),
                    ]),
                )
                .field("ip", row.text("ip"))
                .field("userAgent", row.text("user_agent"))
                .field("createdAt", row.datetime_value("date_added"))
                .field("updatedAt", row.datetime_value("date_modified"));

            Ok(RowOutcome::Insert(Transformed::new(doc)))
        })
        .await
}

fn rows_of(groups: &std::collections::HashMap<i64, Vec<SourceRow>>, key: i64) -> &[SourceRow] {
    groups.get(&key).map(Vec::as_slice).unwrap_or_default()
}

/// Payment or shipping address stored on the order as text
fn address(row: &SourceRow, prefix: &str) -> Value {
    let column = |name: &str| Value::from(row.text(&format!("{prefix}_{name}")));
    object([
        ("firstName", column("firstname")),
        ("lastName", column("lastname")),
        ("company", column("company")),
        ("address1", column("address_1")),
        ("address2", column("address_2")),
        ("city", column("city")),
        ("postcode", column("postcode")),
        ("country", column("country")),
        ("zone", column("zone")),
    ])
}
