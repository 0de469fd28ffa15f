//! Target collections: names, schemas and index definitions

use anne_core::schema::Validator;
use anne_core::{FieldDefinition, FieldType, IndexDefinition, Schema, Value};

pub const COUNTRIES: &str = "countries";
pub const ZONES: &str = "zones";
pub const LANGUAGES: &str = "languages";
pub const PRODUCT_OPTIONS: &str = "productoptions";
pub const CATEGORIES: &str = "categories";
pub const ADMINS: &str = "admins";
pub const CUSTOMERS: &str = "customers";
pub const PRODUCTS: &str = "products";
pub const CARTS: &str = "carts";
pub const WISHLISTS: &str = "wishlists";
pub const ORDERS: &str = "orders";
pub const MIGRATION_STATUSES: &str = "migrationstatuses";

/// Every stored document carries its source primary key here
pub const LEGACY_ID: &str = "legacyId";

/// Order status names keyed by OpenCart `order_status_id`
pub const ORDER_STATUSES: &[(i64, &str)] = &[
    (0, "missing"),
    (1, "pending"),
    (2, "processing"),
    (3, "shipped"),
    (5, "complete"),
    (7, "canceled"),
    (8, "denied"),
    (9, "canceledReversal"),
    (10, "failed"),
    (11, "refunded"),
    (12, "reversed"),
    (13, "chargeback"),
    (14, "expired"),
    (15, "processed"),
    (16, "voided"),
];

pub const UNKNOWN_ORDER_STATUS: &str = "unknown";

pub fn order_status_name(status_id: i64) -> &'static str {
    ORDER_STATUSES
        .iter()
        .find(|(id, _)| *id == status_id)
        .map_or(UNKNOWN_ORDER_STATUS, |(_, name)| name)
}

fn required(field_type: FieldType) -> FieldDefinition {
    FieldDefinition::new(field_type).required()
}

fn optional(field_type: FieldType) -> FieldDefinition {
    FieldDefinition::new(field_type).nullable()
}

fn text() -> FieldDefinition {
    FieldDefinition::new(FieldType::string())
}

fn int() -> FieldDefinition {
    FieldDefinition::new(FieldType::Int64)
}

fn float() -> FieldDefinition {
    FieldDefinition::new(FieldType::Float64)
}

fn flag() -> FieldDefinition {
    FieldDefinition::new(FieldType::Boolean)
}

fn date() -> FieldDefinition {
    optional(FieldType::Date)
}

fn reference(collection: &str) -> FieldDefinition {
    optional(FieldType::reference(collection))
}

fn legacy_id() -> FieldDefinition {
    required(FieldType::Int64)
}

fn array_of(item: FieldDefinition) -> FieldDefinition {
    FieldDefinition::new(FieldType::array_of(item)).default_value(Value::Array(Vec::new()))
}

fn address_fields() -> FieldDefinition {
    FieldDefinition::new(FieldType::object([
        ("firstName", text()),
        ("lastName", text()),
        ("company", text()),
        ("address1", text()),
        ("address2", text()),
        ("city", text()),
        ("postcode", text()),
        ("country", text()),
        ("zone", text()),
    ]))
}

pub fn countries() -> Schema {
    Schema::new(COUNTRIES)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("name", required(FieldType::string()))
        .with_field("isoCode2", text())
        .with_field("isoCode3", text())
        .with_field("addressFormat", text())
        .with_field("postcodeRequired", flag())
        .with_field("status", flag())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("name"))
}

pub fn zones() -> Schema {
    Schema::new(ZONES)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("country", required(FieldType::reference(COUNTRIES)))
        .with_field("name", required(FieldType::string()))
        .with_field("code", text())
        .with_field("status", flag())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("country"))
}

pub fn languages() -> Schema {
    Schema::new(LANGUAGES)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("name", required(FieldType::string()))
        .with_field(
            "code",
            required(FieldType::string()).add_validator(Validator::MinLength(2)),
        )
        .with_field("locale", text())
        .with_field("image", text())
        .with_field("directory", text())
        .with_field("sortOrder", int())
        .with_field("status", flag())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("code").unique())
}

pub fn product_options() -> Schema {
    let value = FieldDefinition::new(FieldType::object([
        (LEGACY_ID, legacy_id()),
        ("name", text()),
        ("image", text()),
        ("sortOrder", int()),
    ]));

    Schema::new(PRODUCT_OPTIONS)
        .with_field(LEGACY_ID, legacy_id())
        .with_field(
            "type",
            required(FieldType::string()).add_validator(Validator::Enum(
                [
                    "select", "radio", "checkbox", "text", "textarea", "file", "date", "time",
                    "datetime", "image",
                ]
                .into_iter()
                .map(Value::from)
                .collect(),
            )),
        )
        .with_field("name", required(FieldType::string()))
        .with_field("sortOrder", int())
        .with_field("values", array_of(value))
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
}

pub fn categories() -> Schema {
    Schema::new(CATEGORIES)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("name", required(FieldType::string()))
        .with_field("description", text())
        .with_field("metaTitle", text())
        .with_field("metaDescription", text())
        .with_field("metaKeyword", text())
        .with_field("image", optional(FieldType::string()))
        .with_field("parent", reference(CATEGORIES))
        .with_field("top", flag())
        .with_field("column", int())
        .with_field("sortOrder", int())
        .with_field("status", flag())
        .with_field("language", required(FieldType::reference(LANGUAGES)))
        .with_field("createdAt", date())
        .with_field("updatedAt", date())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("parent"))
}

pub fn admins() -> Schema {
    Schema::new(ADMINS)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("username", required(FieldType::string()))
        .with_field("email", required(FieldType::string()))
        .with_field("firstName", text())
        .with_field("lastName", text())
        .with_field("password", text())
        .with_field("salt", text())
        .with_field("legacyPassword", flag())
        .with_field("userGroupId", int())
        .with_field("image", text())
        .with_field("status", flag())
        .with_field("createdAt", date())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("username").unique())
        .with_index(IndexDefinition::single("email").unique())
}

pub fn customers() -> Schema {
    let address = FieldDefinition::new(FieldType::object([
        ("_id", required(FieldType::ObjectId)),
        (LEGACY_ID, legacy_id()),
        ("firstName", text()),
        ("lastName", text()),
        ("company", text()),
        ("address1", text()),
        ("address2", text()),
        ("city", text()),
        ("postcode", text()),
        ("country", reference(COUNTRIES)),
        ("zone", reference(ZONES)),
        ("isDefault", flag()),
    ]));

    Schema::new(CUSTOMERS)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("firstName", text())
        .with_field("lastName", text())
        .with_field(
            "email",
            required(FieldType::string()).add_validator(Validator::Regex(r"^[^@\s]+@[^@\s]+$".to_string())),
        )
        .with_field("telephone", text())
        .with_field("password", text())
        .with_field("salt", text())
        .with_field("legacyPassword", flag())
        .with_field("newsletter", flag())
        .with_field("status", flag())
        .with_field("customerGroupId", int())
        .with_field("language", reference(LANGUAGES))
        .with_field("addresses", array_of(address))
        .with_field("createdAt", date())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("email").unique())
}

pub fn products() -> Schema {
    let image = FieldDefinition::new(FieldType::object([
        ("path", required(FieldType::string())),
        ("sortOrder", int()),
    ]));
    let option = FieldDefinition::new(FieldType::object([
        ("_id", required(FieldType::ObjectId)),
        (LEGACY_ID, legacy_id()),
        ("productOptionId", int()),
        ("option", reference(PRODUCT_OPTIONS)),
        ("optionValueId", int()),
        ("name", text()),
        ("quantity", int()),
        ("subtract", flag()),
        ("price", float()),
        ("pricePrefix", text()),
        ("points", int()),
        ("weight", float()),
        ("weightPrefix", text()),
    ]));

    Schema::new(PRODUCTS)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("name", required(FieldType::string()))
        .with_field("description", text())
        .with_field("tags", array_of(text()))
        .with_field("metaTitle", text())
        .with_field("metaDescription", text())
        .with_field("metaKeyword", text())
        .with_field("model", text())
        .with_field("sku", text())
        .with_field("quantity", int())
        .with_field("price", required(FieldType::Float64))
        .with_field("status", flag())
        .with_field("image", optional(FieldType::string()))
        .with_field("images", array_of(image))
        .with_field("categories", array_of(reference(CATEGORIES)))
        .with_field("options", array_of(option))
        .with_field("language", required(FieldType::reference(LANGUAGES)))
        .with_field("weight", float())
        .with_field(
            "dimensions",
            FieldDefinition::new(FieldType::object([
                ("length", float()),
                ("width", float()),
                ("height", float()),
            ])),
        )
        .with_field("viewed", int())
        .with_field("dateAvailable", date())
        .with_field("createdAt", date())
        .with_field("updatedAt", date())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("model"))
        .with_index(IndexDefinition::single("categories"))
        .with_index(IndexDefinition::single("options.legacyId"))
}

pub fn carts() -> Schema {
    let option = FieldDefinition::new(FieldType::object([
        ("productOptionId", required(FieldType::Int64)),
        ("value", FieldDefinition::new(FieldType::Any)),
    ]));

    Schema::new(CARTS)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("customer", reference(CUSTOMERS))
        .with_field("sessionId", text())
        .with_field("product", reference(PRODUCTS))
        .with_field("options", array_of(option))
        .with_field("quantity", required(FieldType::Int64))
        .with_field("createdAt", date())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("customer"))
        .with_index(IndexDefinition::single("sessionId"))
}

pub fn wishlists() -> Schema {
    Schema::new(WISHLISTS)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("customer", required(FieldType::reference(CUSTOMERS)))
        .with_field(
            "products",
            required(FieldType::array_of(required(FieldType::reference(PRODUCTS))))
                .add_validator(Validator::MinLength(1)),
        )
        .with_field("createdAt", date())
        .with_field("updatedAt", date())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("customer").unique())
}

pub fn orders() -> Schema {
    let item_option = FieldDefinition::new(FieldType::object([
        (LEGACY_ID, legacy_id()),
        ("productOptionValue", reference(PRODUCTS)),
        ("name", text()),
        ("value", text()),
        ("type", text()),
    ]));
    let item = FieldDefinition::new(FieldType::object([
        ("_id", required(FieldType::ObjectId)),
        (LEGACY_ID, legacy_id()),
        ("product", reference(PRODUCTS)),
        ("name", text()),
        ("model", text()),
        ("quantity", int()),
        ("price", float()),
        ("total", float()),
        ("tax", float()),
        ("reward", int()),
        ("options", array_of(item_option)),
    ]));
    let total = FieldDefinition::new(FieldType::object([
        ("code", required(FieldType::string())),
        ("title", text()),
        ("value", float()),
        ("sortOrder", int()),
    ]));
    let history = FieldDefinition::new(FieldType::object([
        ("status", required(FieldType::string())),
        ("statusId", int()),
        ("notify", flag()),
        ("comment", text()),
        ("createdAt", date()),
    ]));
    let status_names: Vec<Value> = ORDER_STATUSES
        .iter()
        .map(|(_, name)| Value::from(*name))
        .chain(std::iter::once(Value::from(UNKNOWN_ORDER_STATUS)))
        .collect();

    Schema::new(ORDERS)
        .with_field(LEGACY_ID, legacy_id())
        .with_field("invoiceNo", text())
        .with_field("customer", reference(CUSTOMERS))
        .with_field(
            "customerInfo",
            FieldDefinition::new(FieldType::object([
                ("firstName", text()),
                ("lastName", text()),
                ("email", text()),
                ("telephone", text()),
            ])),
        )
        .with_field("paymentAddress", address_fields())
        .with_field("paymentMethod", text())
        .with_field("shippingAddress", address_fields())
        .with_field("shippingMethod", text())
        .with_field("comment", text())
        .with_field("total", required(FieldType::Float64))
        .with_field(
            "status",
            required(FieldType::string()).add_validator(Validator::Enum(status_names)),
        )
        .with_field("statusId", int())
        .with_field("products", array_of(item))
        .with_field("totals", array_of(total))
        .with_field("history", array_of(history))
        .with_field("language", required(FieldType::reference(LANGUAGES)))
        .with_field(
            "currency",
            FieldDefinition::new(FieldType::object([("code", text()), ("value", float())])),
        )
        .with_field("ip", text())
        .with_field("userAgent", text())
        .with_field("createdAt", date())
        .with_field("updatedAt", date())
        .with_index(IndexDefinition::single(LEGACY_ID).unique())
        .with_index(IndexDefinition::single("customer"))
        .with_index(IndexDefinition::single("status"))
        .with_index(IndexDefinition::single("createdAt"))
}

pub fn migration_statuses() -> Schema {
    let details = FieldDefinition::new(FieldType::object([
        ("processed", int()),
        ("succeeded", int()),
        ("failed", int()),
        ("skipped", int()),
        ("batchSize", int()),
        ("lastBatchSize", int()),
        ("totalBatches", int()),
    ]));

    Schema::new(MIGRATION_STATUSES)
        .with_field("phase", required(FieldType::string()))
        .with_field(
            "status",
            required(FieldType::string()).add_validator(Validator::Enum(vec![
                Value::from("inProgress"),
                Value::from("completed"),
                Value::from("failed"),
            ])),
        )
        .with_field("startedAt", required(FieldType::Date))
        .with_field("completedAt", date())
        .with_field("durationMs", int())
        .with_field("details", details)
        .with_field("error", optional(FieldType::string()))
        .with_index(IndexDefinition::single("phase").unique())
}

/// Schemas of every collection the migration writes
pub fn all_schemas() -> Vec<Schema> {
    vec![
        countries(),
        zones(),
        languages(),
        product_options(),
        categories(),
        admins(),
        customers(),
        products(),
        carts(),
        wishlists(),
        orders(),
        migration_statuses(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_schema_is_consistent() {
        for schema in all_schemas() {
            schema
                .check_consistency()
                .unwrap_or_else(|e| panic!("{}: {}", schema.collection, e));
        }
    }

    #[test]
    fn test_every_collection_indexes_legacy_id() {
        for schema in all_schemas() {
            if schema.collection == MIGRATION_STATUSES {
                continue;
            }
            assert!(
                schema
                    .indexes
                    .iter()
                    .any(|i| i.unique && i.fields() == vec![LEGACY_ID]),
                "{} lacks a unique legacyId index",
                schema.collection
            );
        }
    }

    #[test]
    fn test_order_status_names() {
        assert_eq!(order_status_name(5), "complete");
        assert_eq!(order_status_name(0), "missing");
        assert_eq!(order_status_name(42), UNKNOWN_ORDER_STATUS);
    }
}
