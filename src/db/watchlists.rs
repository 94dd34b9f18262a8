//! Local cache of the backend's watchlists, so the dashboard can render the
//! last known lists before the first refresh completes.

use crate::error::AppError;
use crate::models::{now_unix_ms, Watchlist, WatchlistToken};
use sqlx::{Row, SqlitePool};

/// Replaces the cached lists wholesale. Token metadata is re-cached after the
/// next fetch; membership rows are written here without it.
pub async fn save_watchlists(pool: &SqlitePool, watchlists: &[Watchlist]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    let now = now_unix_ms();

    sqlx::query("DELETE FROM watchlists").execute(&mut *tx).await?;

    for watchlist in watchlists {
        sqlx::query(
            "INSERT INTO watchlists (id, name, description, updated_at_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(&watchlist.id)
        .bind(&watchlist.name)
        .bind(&watchlist.description)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for address in &watchlist.tokens {
            sqlx::query(
                "INSERT OR IGNORE INTO watchlist_tokens (watchlist_id, token_address) VALUES (?, ?)",
            )
            .bind(&watchlist.id)
            .bind(address)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

pub async fn load_watchlists(pool: &SqlitePool) -> Result<Vec<Watchlist>, AppError> {
    let rows = sqlx::query("SELECT id, name, description FROM watchlists ORDER BY name")
        .fetch_all(pool)
        .await?;

    let mut watchlists = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.get("id");
        let token_rows = sqlx::query(
            "SELECT token_address FROM watchlist_tokens WHERE watchlist_id = ? ORDER BY token_address",
        )
        .bind(&id)
        .fetch_all(pool)
        .await?;

        watchlists.push(Watchlist {
            id,
            name: row.get("name"),
            description: row.get("description"),
            tokens: token_rows
                .iter()
                .map(|token_row| token_row.get("token_address"))
                .collect(),
            created_at: None,
            updated_at: None,
        });
    }

    Ok(watchlists)
}

pub async fn save_token_metadata(
    pool: &SqlitePool,
    watchlist_id: &str,
    token: &WatchlistToken,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO watchlist_tokens (watchlist_id, token_address, symbol, name, market_cap)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (watchlist_id, token_address)
         DO UPDATE SET symbol = excluded.symbol, name = excluded.name, market_cap = excluded.market_cap",
    )
    .bind(watchlist_id)
    .bind(&token.address)
    .bind(&token.symbol)
    .bind(&token.name)
    .bind(token.market_cap)
    .execute(pool)
    .await?;
    Ok(())
}

/// Tokens of one list that already have metadata cached.
pub async fn load_token_metadata(
    pool: &SqlitePool,
    watchlist_id: &str,
) -> Result<Vec<WatchlistToken>, AppError> {
    let rows = sqlx::query(
        "SELECT token_address, symbol, name, market_cap FROM watchlist_tokens
         WHERE watchlist_id = ? AND symbol IS NOT NULL ORDER BY token_address",
    )
    .bind(watchlist_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| WatchlistToken {
            address: row.get("token_address"),
            symbol: row.get("symbol"),
            name: row.get("name"),
            market_cap: row.get("market_cap"),
        })
        .collect())
}

pub async fn save_active_watchlist(
    pool: &SqlitePool,
    watchlist_id: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO watchlist_state (id, active_watchlist_id) VALUES (1, ?)
         ON CONFLICT (id) DO UPDATE SET active_watchlist_id = excluded.active_watchlist_id",
    )
    .bind(watchlist_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_active_watchlist(pool: &SqlitePool) -> Result<Option<String>, AppError> {
    let row = sqlx::query("SELECT active_watchlist_id FROM watchlist_state WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|row| row.get("active_watchlist_id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn watchlist(id: &str, name: &str, tokens: &[&str]) -> Watchlist {
        Watchlist {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            tokens: tokens.iter().map(|token| token.to_string()).collect(),
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn watchlists_round_trip_through_cache() {
        let pool = test_pool().await;

        save_watchlists(
            &pool,
            &[
                watchlist("wl-1", "Alpha", &["mint-a", "mint-b"]),
                watchlist("wl-2", "Beta", &[]),
            ],
        )
        .await
        .expect("save");

        let loaded = load_watchlists(&pool).await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "Alpha");
        assert_eq!(loaded[0].tokens, vec!["mint-a", "mint-b"]);
        assert!(loaded[1].tokens.is_empty());
    }

    #[tokio::test]
    async fn replacing_lists_drops_removed_members() {
        let pool = test_pool().await;

        save_watchlists(&pool, &[watchlist("wl-1", "Alpha", &["mint-a"])])
            .await
            .expect("save");
        save_watchlists(&pool, &[watchlist("wl-2", "Beta", &["mint-b"])])
            .await
            .expect("replace");

        let loaded = load_watchlists(&pool).await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "wl-2");

        // CASCADE removed wl-1's token rows with the list itself.
        let orphaned = load_token_metadata(&pool, "wl-1").await.expect("load tokens");
        assert!(orphaned.is_empty());
    }

    #[tokio::test]
    async fn token_metadata_upserts_and_filters_unknown() {
        let pool = test_pool().await;
        save_watchlists(&pool, &[watchlist("wl-1", "Alpha", &["mint-a", "mint-b"])])
            .await
            .expect("save");

        let token = WatchlistToken {
            address: "mint-a".to_string(),
            symbol: "TKN".to_string(),
            name: "Token".to_string(),
            market_cap: Some(5_000.0),
        };
        save_token_metadata(&pool, "wl-1", &token).await.expect("upsert");

        let cached = load_token_metadata(&pool, "wl-1").await.expect("load");
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].symbol, "TKN");
        assert_eq!(cached[0].market_cap, Some(5_000.0));
    }

    #[tokio::test]
    async fn active_watchlist_round_trips() {
        let pool = test_pool().await;
        assert_eq!(load_active_watchlist(&pool).await.expect("load"), None);

        save_active_watchlist(&pool, Some("wl-1")).await.expect("save");
        assert_eq!(
            load_active_watchlist(&pool).await.expect("load"),
            Some("wl-1".to_string())
        );

        save_active_watchlist(&pool, None).await.expect("clear");
        assert_eq!(load_active_watchlist(&pool).await.expect("load"), None);
    }
}
