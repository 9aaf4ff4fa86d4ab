use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use webloom_core::cookie::{domain_from_url, CookieData, DomainCookies, DomainSummary};
use webloom_core::error::Result;
use webloom_core::traits::CookieStore;

use crate::store::{db_err, parse_time, SqliteStore};

impl CookieStore for SqliteStore {
    fn save_cookies(&self, cookies: DomainCookies) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let domain = domain_from_url(&cookies.domain);
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO domain_cookies (domain, cookies, url, saved_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(domain) DO UPDATE SET
                    cookies = excluded.cookies,
                    url = excluded.url,
                    saved_at = excluded.saved_at,
                    updated_at = excluded.updated_at",
                params![
                    domain,
                    serde_json::to_string(&cookies.cookies)?,
                    cookies.url,
                    cookies.saved_at.to_rfc3339(),
                    Utc::now().timestamp(),
                ],
            )
            .map_err(db_err)?;
            debug!(domain = %domain, count = cookies.cookies.len(), "Cookies saved");
            Ok(domain)
        })
    }

    fn load_cookies<'a>(
        &'a self,
        domain: &'a str,
    ) -> BoxFuture<'a, Result<Option<DomainCookies>>> {
        Box::pin(async move {
            let domain = domain_from_url(domain);
            let conn = self.conn()?;
            let row = conn
                .query_row(
                    "SELECT cookies, url, saved_at FROM domain_cookies WHERE domain = ?1",
                    params![domain],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(db_err)?;

            let Some((cookies, url, saved_at)) = row else {
                return Ok(None);
            };
            let cookies: Vec<CookieData> = serde_json::from_str(&cookies)?;
            Ok(Some(DomainCookies {
                domain,
                cookies,
                saved_at: parse_time(&saved_at),
                url,
            }))
        })
    }

    fn list_domains(&self) -> BoxFuture<'_, Result<Vec<DomainSummary>>> {
        Box::pin(async move {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(
                    "SELECT domain, cookies, saved_at FROM domain_cookies ORDER BY updated_at DESC, domain",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    let domain: String = row.get(0)?;
                    let cookies: String = row.get(1)?;
                    let saved_at: String = row.get(2)?;
                    Ok((domain, cookies, saved_at))
                })
                .map_err(db_err)?;

            let mut out = Vec::new();
            for row in rows {
                let (domain, cookies, saved_at) = row.map_err(db_err)?;
                let cookie_count = serde_json::from_str::<Vec<serde_json::Value>>(&cookies)
                    .map(|v| v.len())
                    .unwrap_or(0);
                out.push(DomainSummary {
                    domain,
                    cookie_count,
                    last_updated: parse_time(&saved_at),
                });
            }
            Ok(out)
        })
    }

    fn delete_cookies<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let domain = domain_from_url(domain);
            let conn = self.conn()?;
            let n = conn
                .execute("DELETE FROM domain_cookies WHERE domain = ?1", params![domain])
                .map_err(db_err)?;
            Ok(n > 0)
        })
    }

    fn cleanup_older_than(&self, days: u32) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let cutoff = Utc::now().timestamp() - i64::from(days) * 86_400;
            let conn = self.conn()?;
            let n = conn
                .execute(
                    "DELETE FROM domain_cookies WHERE updated_at < ?1",
                    params![cutoff],
                )
                .map_err(db_err)?;
            if n > 0 {
                info!(removed = n, days, "Expired cookie sets removed");
            }
            Ok(n)
        })
    }
}
