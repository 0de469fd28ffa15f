use super::keyed;
use crate::context::MigrationContext;
use crate::error::{MigrateError, RowError};
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::{EntityKind, MappingTable};
use crate::models::{self, LEGACY_ID};
use anne_core::{object, Document, MigrationLog, Value};

/// Cart lines. Guest carts (`customer_id = 0`) keep only their session id.
pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let rows = ctx.source.select_all("cart", &["cart_id"]).await?;
    let schema = models::carts();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "cart_id"), |mappings, id, row| {
            let context = format!("Cart {id}");
            let customer =
                mappings.resolve(EntityKind::Customer, row.int_or("customer_id", 0), log, &context);
            let product =
                mappings.resolve(EntityKind::Product, row.int_or("product_id", 0), log, &context);
            let options = cart_options(&row.text("option"), mappings, log, &context)?;

            let doc = Document::new()
                .field(LEGACY_ID, id)
                .field("customer", customer)
                .field("sessionId", row.text("session_id"))
                .field("product", product)
                .field("options", options)
                .field("quantity", row.int("quantity")?)
                .field("createdAt", row.datetime_value("date_added"));

            Ok(RowOutcome::Insert(Transformed::new(doc)))
        })
        .await
}

/// Resolve the cart option JSON, `{"<product_option_id>": <value>}`.
///
/// Numeric values name a product option value and become its id (null when it
/// was not migrated). Other values, such as text answers, are kept as given.
fn cart_options(
    raw: &str,
    mappings: &MappingTable,
    log: &MigrationLog,
    context: &str,
) -> Result<Vec<Value>, RowError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let parsed: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| RowError::InvalidValue {
            column: "option".to_string(),
            reason: e.to_string(),
        })?;

    let entries = match parsed {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Array(items) if items.is_empty() => return Ok(Vec::new()),
        other => {
            return Err(RowError::InvalidValue {
                column: "option".to_string(),
                reason: format!("expected an object, got {other}"),
            })
        }
    };

    let mut options = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let product_option_id: i64 = key.parse().map_err(|_| RowError::InvalidValue {
            column: "option".to_string(),
            reason: format!("option key '{key}' is not an id"),
        })?;
        options.push(object([
            ("productOptionId", Value::Int64(product_option_id)),
            ("value", option_value(&value, mappings, log, context)),
        ]));
    }
    Ok(options)
}

fn option_value(
    value: &serde_json::Value,
    mappings: &MappingTable,
    log: &MigrationLog,
    context: &str,
) -> Value {
    let numeric = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match (numeric, value) {
        (Some(pov_id), _) => mappings
            .resolve(EntityKind::ProductOptionValue, pov_id, log, context)
            .into(),
        (None, serde_json::Value::Array(items)) => Value::Array(
            items
                .iter()
                .map(|item| option_value(item, mappings, log, context))
                .collect(),
        ),
        (None, serde_json::Value::String(s)) => Value::String(s.clone()),
        (None, serde_json::Value::Null) => Value::Null,
        (None, other) => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anne_core::ObjectId;

    #[test]
    fn test_cart_options_resolve_through_option_values() {
        let mut mappings = MappingTable::new();
        let red = ObjectId::new();
        let blue = ObjectId::new();
        mappings.set(EntityKind::ProductOptionValue, 17, red);
        mappings.set(EntityKind::ProductOptionValue, 18, blue);
        let log = MigrationLog::console("carts");

        let options = cart_options(
            r#"{"227":"17","228":["17","18"],"229":"Name on hoop","230":"99"}"#,
            &mappings,
            &log,
            "Cart 1",
        )
        .unwrap();

        let values: Vec<Value> = options
            .iter()
            .map(|o| o.as_object().unwrap()["value"].clone())
            .collect();
        assert_eq!(values[0], Value::ObjectId(red));
        assert_eq!(
            values[1],
            Value::Array(vec![Value::ObjectId(red), Value::ObjectId(blue)])
        );
        assert_eq!(values[2], Value::from("Name on hoop"));
        assert_eq!(values[3], Value::Null);
    }

    #[test]
    fn test_empty_and_invalid_option_json() {
        let mappings = MappingTable::new();
        let log = MigrationLog::console("carts");
        assert!(cart_options("", &mappings, &log, "Cart 1").unwrap().is_empty());
        assert!(cart_options("[]", &mappings, &log, "Cart 1").unwrap().is_empty());
        assert!(cart_options("{oops", &mappings, &log, "Cart 1").is_err());
        assert!(cart_options(r#"{"abc": 1}"#, &mappings, &log, "Cart 1").is_err());
    }
}
