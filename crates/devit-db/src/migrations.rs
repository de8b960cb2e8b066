use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                  TEXT PRIMARY KEY,
                username            TEXT NOT NULL UNIQUE,
                email               TEXT NOT NULL UNIQUE,
                password            TEXT NOT NULL,
                karma               INTEGER NOT NULL DEFAULT 0,
                bio                 TEXT,
                reset_code          TEXT,
                reset_code_expiry   TEXT,
                refresh_token_hash  TEXT,
                created_at          TEXT NOT NULL
            );

            CREATE TABLE posts (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                content     TEXT NOT NULL,
                author      TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                image_url   TEXT,
                upvotes     INTEGER NOT NULL DEFAULT 0,
                downvotes   INTEGER NOT NULL DEFAULT 0,
                -- JSON {upvoters, downvoters}; NULL on rows written before vote tracking
                voters      TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_posts_created ON posts(created_at);

            CREATE TABLE comments (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES posts(id),
                text        TEXT NOT NULL,
                username    TEXT NOT NULL,
                user_id     TEXT,
                upvotes     INTEGER NOT NULL DEFAULT 0,
                downvotes   INTEGER NOT NULL DEFAULT 0,
                voters      TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_comments_post ON comments(post_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
