use std::{iter, time::Duration};

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "couple_quiz";

/// Connection settings for [`super::MongoSessionStore`].
#[derive(Clone)]
pub struct MongoConfig {
    /// Parsed driver options.
    pub options: ClientOptions,
    /// Database holding the `game_sessions` and `game_answers` collections.
    pub database_name: String,
    /// Backoff used until the server first answers a ping.
    pub retry: ConnectRetry,
}

/// Ping attempts made before a connection is declared failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRetry {
    /// Total number of pings, including the first one.
    pub attempts: u32,
    /// Pause after the first failed ping; doubled after each further failure.
    pub initial_delay: Duration,
    /// Upper bound of a single pause.
    pub max_delay: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ConnectRetry {
    /// Pauses between consecutive pings, one fewer than `attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let max = self.max_delay;
        iter::successors(Some(self.initial_delay.min(max)), move |delay| {
            Some((*delay * 2).min(max))
        })
        .take(self.attempts.saturating_sub(1) as usize)
    }
}

impl MongoConfig {
    /// Parse a connection URI, defaulting the database name.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let database_name = db_name.unwrap_or(DEFAULT_DATABASE).to_owned();
        let options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;

        Ok(Self {
            options,
            database_name,
            retry: ConnectRetry::default(),
        })
    }

    /// Replace the connection backoff.
    pub fn with_retry(mut self, retry: ConnectRetry) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_the_cap() {
        let delays: Vec<u64> = ConnectRetry::default()
            .delays()
            .map(|delay| delay.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000]);

        let capped = ConnectRetry {
            attempts: 4,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(4),
        };
        assert_eq!(
            capped.delays().collect::<Vec<_>>(),
            vec![Duration::from_secs(3), Duration::from_secs(4), Duration::from_secs(4)]
        );
    }

    #[test]
    fn single_attempt_never_waits() {
        let once = ConnectRetry {
            attempts: 1,
            ..ConnectRetry::default()
        };
        assert_eq!(once.delays().count(), 0);
        let none = ConnectRetry {
            attempts: 0,
            ..ConnectRetry::default()
        };
        assert_eq!(none.delays().count(), 0);
    }
}
