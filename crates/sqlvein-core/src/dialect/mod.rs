//! SQL dialect support

use sqlparser::dialect::{Dialect, GenericDialect, HiveDialect, MySqlDialect, PostgreSqlDialect};
use std::str::FromStr;

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    PostgreSQL,
    MySQL,
    Hive,
    Generic,
}

impl SqlDialect {
    /// Get the sqlparser dialect for parsing
    pub fn parser_dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::PostgreSQL => Box::new(PostgreSqlDialect {}),
            SqlDialect::MySQL => Box::new(MySqlDialect {}),
            SqlDialect::Hive => Box::new(HiveDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
        }
    }

    /// Get default schema name for this dialect
    pub fn default_schema(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "public",
            SqlDialect::MySQL => "",
            SqlDialect::Hive => "default",
            SqlDialect::Generic => "",
        }
    }
}

impl FromStr for SqlDialect {
    type Err = String;

    /// Accepts both dialect names and the platform identifiers used by
    /// metadata systems (e.g. "postgres", "redshift", "hive").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" | "redshift" => Ok(SqlDialect::PostgreSQL),
            "mysql" | "mysql8" | "mariadb" => Ok(SqlDialect::MySQL),
            "hive" | "spark" | "databricks" => Ok(SqlDialect::Hive),
            "generic" | "ansi" => Ok(SqlDialect::Generic),
            _ => Err(format!(
                "Unknown dialect: '{}'. Supported dialects: postgresql, mysql, hive, generic.",
                s
            )),
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlDialect::PostgreSQL => write!(f, "postgresql"),
            SqlDialect::MySQL => write!(f, "mysql"),
            SqlDialect::Hive => write!(f, "hive"),
            SqlDialect::Generic => write!(f, "generic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_names_map_to_dialects() {
        assert_eq!("postgres".parse::<SqlDialect>(), Ok(SqlDialect::PostgreSQL));
        assert_eq!("redshift".parse::<SqlDialect>(), Ok(SqlDialect::PostgreSQL));
        assert_eq!("hive".parse::<SqlDialect>(), Ok(SqlDialect::Hive));
        assert!("teradata".parse::<SqlDialect>().is_err());
    }
}
