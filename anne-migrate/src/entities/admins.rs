use super::{keyed, EmailAssigner};
use crate::context::MigrationContext;
use crate::error::MigrateError;
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::models::{self, LEGACY_ID};
use anne_core::{Document, MigrationLog};

/// Back-office users from `user`
pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let rows = ctx.source.select_all("user", &["user_id"]).await?;
    let mut emails = EmailAssigner::new("admin", &ctx.settings.generated_email_domain);
    let schema = models::admins();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(&mut ctx.mappings, keyed(rows, "user_id"), |_, id, row| {
            let (email, note) = emails.assign(&row.text("email"), id);
            if let Some(note) = note {
                log.warn(format!("Admin {id}: {note}"));
            }
            let username = row
                .opt_text("username")
                .unwrap_or_else(|| format!("admin_{id}"));

            let doc = Document::new()
                .field(LEGACY_ID, id)
                .field("username", username)
                .field("email", email)
                .field("firstName", row.text("firstname"))
                .field("lastName", row.text("lastname"))
                .field("password", row.text("password"))
                .field("salt", row.text("salt"))
                .field("legacyPassword", true)
                .field("userGroupId", row.int_or("user_group_id", 0))
                .field("image", row.text("image"))
                .field("status", row.flag("status"))
                .field("createdAt", row.datetime_value("date_added"));

            Ok(RowOutcome::Insert(Transformed::new(doc)))
        })
        .await
}
