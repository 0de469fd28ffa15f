use super::{group_by, keyed};
use crate::context::MigrationContext;
use crate::error::MigrateError;
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::EntityKind;
use crate::models::{self, LEGACY_ID};
use anne_core::{object, Document, MigrationLog, ObjectId, Value};
use std::collections::HashSet;

/// Hands out unique, normalised email addresses.
///
/// Addresses are trimmed and lower-cased. An empty or malformed address is
/// replaced by `<prefix>_<id>@<domain>`; a duplicate is rewritten to
/// `<local>_<id>@<its own domain>`.
#[derive(Debug)]
pub struct EmailAssigner {
    prefix: &'static str,
    domain: String,
    seen: HashSet<String>,
}

impl EmailAssigner {
    pub fn new(prefix: &'static str, domain: &str) -> Self {
        Self {
            prefix,
            domain: domain.to_string(),
            seen: HashSet::new(),
        }
    }

    /// Assign an address for `source_id`, with a note when it was changed
    pub fn assign(&mut self, raw: &str, source_id: i64) -> (String, Option<String>) {
        let normalized = raw.trim().to_lowercase();
        let well_formed = normalized.matches('@').count() == 1
            && !normalized.starts_with('@')
            && !normalized.ends_with('@')
            && !normalized.contains(char::is_whitespace);

        let (mut email, mut note) = if normalized.is_empty() {
            (
                format!("{}_{}@{}", self.prefix, source_id, self.domain),
                Some("empty email replaced".to_string()),
            )
        } else if !well_formed {
            (
                format!("{}_{}@{}", self.prefix, source_id, self.domain),
                Some(format!("malformed email '{}' replaced", raw.trim())),
            )
        } else {
            (normalized, None)
        };

        if self.seen.contains(&email) {
            let (local, domain) = email.split_once('@').unwrap_or((email.as_str(), ""));
            let mut candidate = format!("{local}_{source_id}@{domain}");
            let mut n = 2;
            while self.seen.contains(&candidate) {
                candidate = format!("{local}_{source_id}_{n}@{domain}");
                n += 1;
            }
            note = Some(format!("duplicate email '{email}' rewritten to '{candidate}'"));
            email = candidate;
        }

        self.seen.insert(email.clone());
        (email, note)
    }
}

/// Customers with their addresses embedded
pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let language = ctx.default_language().await?;
    let rows = ctx.source.select_all("customer", &["customer_id"]).await?;
    let addresses = group_by(
        ctx.source
            .select_all("address", &["customer_id", "address_id"])
            .await?,
        "customer_id",
    );
    let mut emails = EmailAssigner::new("customer", &ctx.settings.generated_email_domain);
    let schema = models::customers();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "customer_id"), |mappings, id, row| {
            let (email, note) = emails.assign(&row.text("email"), id);
            if let Some(note) = note {
                log.warn(format!("Customer {id}: {note}"));
            }

            let context = format!("Customer {id}");
            let default_address = row.int_or("address_id", 0);
            let embedded: Vec<Value> = addresses
                .get(&id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(|address| {
                    let address_id = address.int_or("address_id", 0);
                    let context = format!("{context} address {address_id}");
                    let country = mappings.resolve(
                        EntityKind::Country,
                        address.int_or("country_id", 0),
                        log,
                        &context,
                    );
                    let zone = mappings.resolve(
                        EntityKind::Zone,
                        address.int_or("zone_id", 0),
                        log,
                        &context,
                    );
                    object([
                        ("_id", Value::ObjectId(ObjectId::new())),
                        (LEGACY_ID, Value::Int64(address_id)),
                        ("firstName", address.text("firstname").into()),
                        ("lastName", address.text("lastname").into()),
                        ("company", address.text("company").into()),
                        ("address1", address.text("address_1").into()),
                        ("address2", address.text("address_2").into()),
                        ("city", address.text("city").into()),
                        ("postcode", address.text("postcode").into()),
                        ("country", country.into()),
                        ("zone", zone.into()),
                        ("isDefault", Value::Bool(address_id == default_address)),
                    ])
                })
                .collect();

            let customer_language = mappings
                .resolve(EntityKind::Language, row.int_or("language_id", 0), log, &context)
                .unwrap_or(language.id);

            let doc = Document::new()
                .field(LEGACY_ID, id)
                .field("firstName", row.text("firstname"))
                .field("lastName", row.text("lastname"))
                .field("email", email)
                .field("telephone", row.text("telephone"))
                .field("password", row.text("password"))
                .field("salt", row.text("salt"))
                .field("legacyPassword", true)
                .field("newsletter", row.flag("newsletter"))
                .field("status", row.flag("status"))
                .field("customerGroupId", row.int_or("customer_group_id", 0))
                .field("language", customer_language)
                .field("addresses", embedded)
                .field("createdAt", row.datetime_value("date_added"));

            Ok(RowOutcome::Insert(
                Transformed::new(doc).maps(EntityKind::Customer, id),
            ))
        })
        .await
}
