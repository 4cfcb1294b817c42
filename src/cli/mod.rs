use std::{borrow::Cow, net::SocketAddr};

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::server;

/// Bookkeeping backend for personal finances.
#[derive(Parser)]
#[clap(version)]
struct Cli {
    /// Address the HTTP server listens on.
    #[clap(long = "bind-address", default_value = "0.0.0.0:8000", env = "BIND_ADDRESS")]
    bind_address: SocketAddr,

    /// Connection string for the application database.
    ///
    /// Without it, all data is kept in memory and lost when the server
    /// stops.
    #[clap(long = "database-url", env = "DATABASE_URL")]
    database_url: Option<String>,

    /// The number of connections to use for the database pool.
    #[clap(long = "database-pool-size", default_value = "16", env = "DATABASE_POOL_SIZE")]
    database_pool_size: u32,

    /// The number of seconds before a database connection times out.
    #[clap(long = "database-timeout", default_value = "5", env = "DATABASE_TIMEOUT")]
    database_timeout: u8,

    /// Address to send emails from.
    #[clap(
        long = "email-from-address",
        default_value = "ledger@localhost",
        env = "EMAIL_FROM_ADDRESS"
    )]
    email_from_address: String,

    /// Display name to send emails from.
    #[clap(
        long = "email-from-name",
        default_value = "Pocket Ledger",
        env = "EMAIL_FROM_NAME"
    )]
    email_from_name: String,

    /// API key for SendGrid.
    ///
    /// If provided, emails will be sent using SendGrid. If this is not set,
    /// emails will be written to the log.
    #[clap(long = "sendgrid-key", env = "SENDGRID_KEY")]
    sendgrid_key: Option<String>,

    /// How many notifications may wait for delivery before new ones are
    /// dropped.
    #[clap(
        long = "notification-queue-size",
        default_value = "64",
        env = "NOTIFICATION_QUEUE_SIZE"
    )]
    notification_queue_size: usize,

    /// DSN to tell Sentry where to send events.
    ///
    /// If provided, errors will be sent to Sentry.
    #[clap(long = "sentry-dsn", env = "SENTRY_DSN")]
    sentry_dsn: Option<String>,
}

impl From<Cli> for server::Options {
    fn from(cli: Cli) -> Self {
        let database_pool_size = cli.database_pool_size;
        let database_timeout = cli.database_timeout;

        Self {
            bind_address: cli.bind_address,
            database: cli.database_url.map(|url| server::DatabaseOptions {
                url,
                pool_size: database_pool_size,
                timeout_seconds: database_timeout,
            }),
            email_from_address: cli.email_from_address,
            email_from_name: cli.email_from_name,
            sendgrid_key: cli.sendgrid_key,
            notification_queue_size: cli.notification_queue_size,
        }
    }
}

pub async fn run_with_sys_args() -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;

    let cli = Cli::parse();

    let sentry_guard = cli.sentry_dsn.clone().map(|dsn| {
        let release_name = option_env!("GIT_SHA")
            .map(Cow::from)
            .or_else(|| sentry::release_name!());

        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: release_name,
                ..Default::default()
            },
        ))
    });

    let sentry_tracing_layer = sentry_guard.as_ref().map(|_| sentry_tracing::layer());

    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sentry_tracing_layer)
        .init();

    if sentry_guard.is_some() {
        debug!("Enabled sentry.");
    }

    server::serve(cli.into()).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags_are_parsed() {
        let cli = Cli::parse_from([
            "pocket-ledger-api",
            "--bind-address",
            "127.0.0.1:9000",
            "--notification-queue-size",
            "8",
        ]);
        let opts = server::Options::from(cli);

        assert_eq!("127.0.0.1:9000".parse::<SocketAddr>().unwrap(), opts.bind_address);
        assert_eq!(8, opts.notification_queue_size);
    }

    #[test]
    fn database_options_are_grouped() {
        let cli = Cli::parse_from([
            "pocket-ledger-api",
            "--database-url",
            "postgres://localhost/ledger",
            "--database-pool-size",
            "4",
        ]);
        let opts = server::Options::from(cli);

        let database = opts.database.expect("database is configured");
        assert_eq!("postgres://localhost/ledger", database.url);
        assert_eq!(4, database.pool_size);
        assert_eq!(5, database.timeout_seconds);
    }
}
