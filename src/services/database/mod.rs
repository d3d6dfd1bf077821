// Connection layer: one trait, one implementation per vendor driver
pub mod adapter;
pub mod postgres;
pub mod sqlite;

pub use adapter::{is_text_kind, PreparedStatement, SqlConnection, SqlValue};
pub use postgres::PostgresConnection;
pub use sqlite::SqliteConnection;

use crate::error::EvalError;
use crate::services::dialect::Dialect;
use url::Url;

/// Split a raw address (`host`, `host:port`, optional trailing `?args`) into
/// host and port, defaulting the port from the dialect's vendor table.
pub fn host_and_port(raw: &str, dialect: &Dialect) -> Result<(String, u16), EvalError> {
    let before_query = raw.split('?').next().unwrap_or("");
    let url = Url::parse(&format!("tcp://{before_query}"))
        .map_err(|e| EvalError::Database(format!("Could not split host-port: {e}")))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| EvalError::Database(format!("Missing host in address: {raw}")))?
        .to_string();
    Ok((host, url.port().unwrap_or(dialect.default_port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::dialect::Vendor;

    #[test]
    fn test_host_and_port_defaulting() {
        let pg = Dialect::for_vendor(Vendor::Postgres);
        assert_eq!(
            host_and_port("localhost", &pg).unwrap(),
            ("localhost".to_string(), 5432)
        );
        assert_eq!(
            host_and_port("db.example.com:9999?sslmode=disable", &pg).unwrap(),
            ("db.example.com".to_string(), 9999)
        );

        let mysql = Dialect::for_vendor(Vendor::Mysql);
        assert_eq!(
            host_and_port("10.0.0.1", &mysql).unwrap(),
            ("10.0.0.1".to_string(), 3306)
        );
    }

    #[test]
    fn test_host_and_port_missing_host() {
        let pg = Dialect::for_vendor(Vendor::Postgres);
        assert!(host_and_port("", &pg).is_err());
    }
}
