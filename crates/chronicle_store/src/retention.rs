use sea_orm::sea_query::{Expr, Query};
use sea_orm::ConnectionTrait;

use crate::config::RetentionPolicy;
use crate::db::MetadataAspect;
use crate::sql::exec;
use chronicle_core::{now_millis, ChronicleResult, Urn, LATEST_VERSION};

/// Trims history rows of `(urn, aspect)` after a displacement to `displaced_to`.
/// Returns the number of rows removed.
pub(crate) async fn enforce<C: ConnectionTrait>(
    conn: &C,
    policy: &RetentionPolicy,
    urn: &Urn,
    aspect_type: &str,
    displaced_to: i64,
) -> ChronicleResult<u64> {
    let mut delete = Query::delete()
        .from_table(MetadataAspect::Table)
        .and_where(Expr::col(MetadataAspect::Urn).eq(urn.to_string()))
        .and_where(Expr::col(MetadataAspect::Aspect).eq(aspect_type))
        .and_where(Expr::col(MetadataAspect::Version).ne(LATEST_VERSION))
        .to_owned();
    match policy {
        RetentionPolicy::Indefinite => return Ok(0),
        RetentionPolicy::Versions {
            max_versions_to_retain,
        } => {
            let last_dropped = displaced_to - i64::from(*max_versions_to_retain);
            if last_dropped < 1 {
                return Ok(0);
            }
            delete.and_where(Expr::col(MetadataAspect::Version).lte(last_dropped));
        }
        RetentionPolicy::Time { max_age_ms } => {
            let max_age = i64::try_from(*max_age_ms).unwrap_or(i64::MAX);
            let cutoff = now_millis().saturating_sub(max_age);
            delete.and_where(Expr::col(MetadataAspect::Createdon).lt(cutoff));
        }
    }
    let removed = exec(conn, &delete).await?;
    if removed > 0 {
        log::debug!("retention removed {removed} history rows of {urn} {aspect_type}");
    }
    Ok(removed)
}
