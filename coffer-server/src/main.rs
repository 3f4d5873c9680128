//! Coffer HTTP server.
//!
//! Loads configuration, opens the connection pool, refuses to start against a schema
//! that does not match the compiled-in migrations, then serves the workflow API.

use anyhow::{anyhow, bail, Context, Result};
use coffer::migration::Migrator;
use coffer::{
    AppConfig, ConnectionPool, Engine, LocalEvidenceStore, PgRecordStore, ValidationPolicy,
};
use coffer_server::{serve, Api};
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load().context("loading configuration")?;
    may::config().set_workers(config.server.workers.max(1));

    let pool = ConnectionPool::from_config(&config.database).context("connecting to database")?;
    {
        let conn = pool.acquire()?;
        if !conn.check_health()? {
            bail!("database health check returned an unexpected value");
        }
        Migrator::embedded()?
            .validate(&*conn)
            .context("schema is not up to date; run `coffer-migrate up`")?;
    }
    log::info!(
        "database ready (max {} connections)",
        config.database.max_connections
    );

    let engine = Engine::new(
        PgRecordStore::new(pool),
        LocalEvidenceStore::new(&config.media),
        ValidationPolicy::from(&config.validation),
    );
    let server = serve(Arc::new(Api::new(engine)), config.server.bind.as_str())
        .with_context(|| format!("binding {}", config.server.bind))?;
    log::info!("coffer-server listening on http://{}", config.server.bind);

    server
        .join()
        .map_err(|e| anyhow!("server stopped: {e:?}"))?;
    Ok(())
}
