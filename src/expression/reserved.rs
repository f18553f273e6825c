//! Reserved attribute names.
//!
//! Attribute names on this list must be referenced through `#name`
//! placeholders. The list covers the DynamoDB reserved words commonly hit
//! in practice.

/// Uppercase reserved words.
pub const RESERVED_WORDS: &[&str] = &[
    "ABORT", "ABSOLUTE", "ACTION", "ADD", "AGGREGATE", "ALL", "ALTER", "ANALYZE", "AND", "ANY",
    "AS", "ASC", "AUTHORIZATION", "AVG", "BATCH", "BEGIN", "BETWEEN", "BINARY", "BOOLEAN", "BOTH",
    "BY", "CALL", "CASCADE", "CASE", "CAST", "CHECK", "COLUMN", "COMMENT", "COMMIT", "CONDITION",
    "CONNECT", "CONNECTION", "CONSTRAINT", "CONTAINS", "COUNT", "CREATE", "CURRENT",
    "DATA", "DATABASE", "DATE", "DAY", "DECLARE", "DEFAULT", "DEFINE", "DELETE", "DESC",
    "DESCRIBE", "DISTINCT", "DROP", "DYNAMIC", "EACH", "ELSE", "EMPTY", "END", "EQUALS", "ESCAPE",
    "EXCEPT", "EXISTS", "EXPLAIN", "FALSE", "FETCH", "FIELD", "FILE", "FILTER", "FIRST", "FLOAT",
    "FOR", "FORMAT", "FROM", "FULL", "FUNCTION", "GENERAL", "GET", "GLOB", "GO", "GRANT", "GROUP",
    "HASH", "HAVE", "HAVING", "HOUR", "IF", "IGNORE", "IN", "INDEX", "INNER", "INSERT", "INT",
    "INTEGER", "INTERSECT", "INTERVAL", "INTO", "IS", "ITEM", "ITEMS", "JOIN", "KEY", "KEYS",
    "LAST", "LEFT", "LEVEL", "LIKE", "LIMIT", "LIST", "LOCAL", "LOCATION", "LOCK", "LONG", "LOOP",
    "MAP", "MATCH", "MAX", "MERGE", "MIN", "MINUTE", "MISSING", "MOD", "MONTH", "NAME", "NAMES",
    "NATURAL", "NEW", "NEXT", "NO", "NONE", "NOT", "NULL", "NUMBER", "NUMERIC", "OBJECT", "OF",
    "OFFSET", "OLD", "ON", "OR", "ORDER", "OTHER", "OUT", "OUTER", "OVER", "PARAMETER",
    "PARTITION", "PERCENT", "POSITION", "PRIMARY", "PRIVATE", "PROJECTION", "PUBLIC", "QUERY",
    "RANGE", "RANK", "READ", "RELATIVE", "REMOVE", "RENAME", "REPLACE", "RESTRICT", "RETURN",
    "RETURNS", "RIGHT", "ROLE", "ROLLBACK", "ROLLUP", "ROW", "ROWS", "SCAN", "SEARCH", "SECOND",
    "SELECT", "SESSION", "SET", "SIZE", "SOME", "SOURCE", "SPACE", "SPLIT", "SQL", "START",
    "STATE", "STATIC", "STATUS", "STORE", "SUBSTRING", "SUM", "TABLE", "THEN", "TIME",
    "TIMESTAMP", "TIMEZONE", "TO", "TOP", "TOTAL", "TRANSACTION", "TRUE", "TTL", "TYPE", "UNDER",
    "UNION", "UNIQUE", "UNIT", "UPDATE", "UPPER", "URL", "USAGE", "USER", "USING", "UUID",
    "VALUE", "VALUES", "VIEW", "VIEWS", "WHEN", "WHERE", "WITH", "WRITE", "YEAR",
];

/// Whether an attribute name may only be used through a `#` placeholder.
pub fn is_reserved(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    RESERVED_WORDS.binary_search(&upper.as_str()).is_ok()
}
