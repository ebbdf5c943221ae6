//! Map storage errors onto retry policy error kinds.

use crate::retry::policy::ErrorKind;

const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

/// Classify a sqlx error for retry decisions.
pub fn classify_sqlx_error(e: &sqlx::Error) -> ErrorKind {
    match e {
        sqlx::Error::PoolTimedOut => ErrorKind::Timeout,
        sqlx::Error::Io(_) => ErrorKind::Connection,
        sqlx::Error::Database(db) => {
            // SQLite reports extended result codes; the primary code is the low byte.
            let primary = db
                .code()
                .and_then(|c| c.parse::<i64>().ok())
                .map(|c| c & 0xff);
            match primary {
                Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => ErrorKind::Busy,
                _ => ErrorKind::Other,
            }
        }
        _ => ErrorKind::Other,
    }
}

/// Classify an error returned by a data-source call. Walks the cause chain
/// looking for a sqlx or I/O error.
pub fn classify(e: &anyhow::Error) -> ErrorKind {
    for cause in e.chain() {
        if let Some(sqlx_err) = cause.downcast_ref::<sqlx::Error>() {
            return classify_sqlx_error(sqlx_err);
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return ErrorKind::Connection;
        }
    }
    ErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_transient() {
        assert_eq!(classify_sqlx_error(&sqlx::Error::PoolTimedOut), ErrorKind::Timeout);
    }

    #[test]
    fn io_errors_are_connection_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(classify(&anyhow::Error::new(io)), ErrorKind::Connection);
    }

    #[test]
    fn row_not_found_is_permanent() {
        assert_eq!(classify_sqlx_error(&sqlx::Error::RowNotFound), ErrorKind::Other);
        assert_eq!(classify(&anyhow::anyhow!("bad share weight")), ErrorKind::Other);
    }

    #[test]
    fn context_does_not_hide_the_cause() {
        let err = anyhow::Error::new(sqlx::Error::PoolTimedOut).context("loading queued links");
        assert_eq!(classify(&err), ErrorKind::Timeout);
    }
}
