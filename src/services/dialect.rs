// Per-vendor SQL syntax rules, consolidated into one value object selected
// once per query and threaded through the rewriter and import pipeline.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Supported SQL vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Postgres,
    Mysql,
    Sqlite,
    Sqlserver,
    Oracle,
    Clickhouse,
    Snowflake,
}

impl Vendor {
    pub fn parse(s: &str) -> Option<Vendor> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Vendor::Postgres),
            "mysql" => Some(Vendor::Mysql),
            "sqlite" | "sqlite3" => Some(Vendor::Sqlite),
            "sqlserver" => Some(Vendor::Sqlserver),
            "oracle" => Some(Vendor::Oracle),
            "clickhouse" => Some(Vendor::Clickhouse),
            "snowflake" => Some(Vendor::Snowflake),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Postgres => "postgres",
            Vendor::Mysql => "mysql",
            Vendor::Sqlite => "sqlite",
            Vendor::Sqlserver => "sqlserver",
            Vendor::Oracle => "oracle",
            Vendor::Clickhouse => "clickhouse",
            Vendor::Snowflake => "snowflake",
        }
    }
}

/// Insert placeholder style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?`, positional
    Question,
    /// `$1..$N`, rewritten from `?` after statement construction
    Dollar,
}

/// Immutable per-vendor syntax rules: quoting, placeholder mangling, DDL type
/// names and the default network port (also consumed by the connection layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub vendor: Vendor,
    pub identifier_quote: char,
    pub string_quote: char,
    pub placeholder: Placeholder,
    pub default_port: u16,
}

static QUESTION_MARK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?").unwrap());

impl Dialect {
    pub fn for_vendor(vendor: Vendor) -> Dialect {
        match vendor {
            Vendor::Postgres => Dialect {
                vendor,
                identifier_quote: '"',
                string_quote: '\'',
                placeholder: Placeholder::Dollar,
                default_port: 5432,
            },
            Vendor::Mysql => Dialect {
                vendor,
                identifier_quote: '`',
                string_quote: '"',
                placeholder: Placeholder::Question,
                default_port: 3306,
            },
            Vendor::Sqlite => Dialect {
                vendor,
                identifier_quote: '"',
                string_quote: '\'',
                placeholder: Placeholder::Question,
                default_port: 0,
            },
            Vendor::Sqlserver => Dialect {
                vendor,
                identifier_quote: '"',
                string_quote: '\'',
                placeholder: Placeholder::Question,
                default_port: 1433,
            },
            Vendor::Oracle => Dialect {
                vendor,
                identifier_quote: '"',
                string_quote: '\'',
                placeholder: Placeholder::Question,
                default_port: 1521,
            },
            Vendor::Clickhouse => Dialect {
                vendor,
                identifier_quote: '"',
                string_quote: '\'',
                placeholder: Placeholder::Question,
                default_port: 9000,
            },
            Vendor::Snowflake => Dialect {
                vendor,
                identifier_quote: '"',
                string_quote: '\'',
                placeholder: Placeholder::Question,
                default_port: 443,
            },
        }
    }

    pub fn quote_identifier(&self, value: &str) -> String {
        quote(value, self.identifier_quote)
    }

    pub fn quote_string(&self, value: &str) -> String {
        quote(value, self.string_quote)
    }

    /// Vendor-specific DDL name for a generic column kind.
    ///
    /// Postgres stores generic REAL columns as DOUBLE PRECISION so that
    /// 64-bit float parameters bind without a cast.
    pub fn ddl_type<'a>(&self, kind: &'a str) -> &'a str {
        match (self.vendor, kind) {
            (Vendor::Postgres, "REAL") => "DOUBLE PRECISION",
            _ => kind,
        }
    }

    /// Rewrite insert placeholders for this vendor. Purely textual, applied
    /// after the statement has been built.
    pub fn mangle_insert(&self, stmt: &str) -> String {
        match self.placeholder {
            Placeholder::Question => stmt.to_string(),
            Placeholder::Dollar => {
                let mut counter = 0;
                QUESTION_MARK_RE
                    .replace_all(stmt, |_: &regex::Captures| {
                        counter += 1;
                        format!("${counter}")
                    })
                    .into_owned()
            }
        }
    }
}

/// Wrap `value` in `quote_char`, doubling internal occurrences.
pub fn quote(value: &str, quote_char: char) -> String {
    let doubled: String = quote_char.to_string().repeat(2);
    format!(
        "{}{}{}",
        quote_char,
        value.replace(quote_char, &doubled),
        quote_char
    )
}
