//! Column metadata.

use crate::value::Value;

/// Declared type of a column, reduced to what default resolution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// `text`, `varchar`, `char`.
    Text,
    /// `tinyint`, `bool`.
    Bool,
    /// `int`, `bigint`, `smallint`.
    Integer,
    /// `decimal`, `float`, `double`.
    Decimal,
    /// `timestamp`, `datetime`, `date`.
    Timestamp,
    /// Anything else.
    Other(String),
}

impl ColumnType {
    /// Parses a SQL type declaration such as `int(11) unsigned`.
    pub fn parse(declared: &str) -> Self {
        let lowered = declared.to_ascii_lowercase();
        let base = lowered
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or("");
        match base {
            "text" | "varchar" | "char" | "tinytext" | "mediumtext" | "longtext" => Self::Text,
            "tinyint" | "bool" | "boolean" => Self::Bool,
            "int" | "integer" | "bigint" | "smallint" | "mediumint" => Self::Integer,
            "decimal" | "float" | "double" | "numeric" => Self::Decimal,
            "timestamp" | "datetime" | "date" => Self::Timestamp,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the default used when the column declares none.
    pub fn fallback_default(&self) -> Value {
        match self {
            Self::Text => Value::Text(String::new()),
            Self::Bool => Value::Bool(false),
            Self::Integer => Value::Integer(0),
            Self::Decimal => Value::Float(0.0),
            Self::Timestamp | Self::Other(_) => Value::now(),
        }
    }
}

/// Declared default of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    /// No declared default.
    None,
    /// `CURRENT_TIMESTAMP`, resolved at insertion time.
    CurrentTimestamp,
    /// A literal default.
    Value(Value),
}

/// Metadata for one column of a backing table.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub column_type: ColumnType,
    /// Declared default.
    pub default: ColumnDefault,
    /// Whether the store assigns this column on insert.
    pub auto_increment: bool,
}

impl Column {
    /// Creates a column with no default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            default: ColumnDefault::None,
            auto_increment: false,
        }
    }

    /// Sets a literal default.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = ColumnDefault::Value(value.into());
        self
    }

    /// Marks the column as defaulting to the current timestamp.
    #[must_use]
    pub fn current_timestamp(mut self) -> Self {
        self.default = ColumnDefault::CurrentTimestamp;
        self
    }

    /// Marks the column as store-assigned.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Resolves the value a new row gets when the caller omits this column.
    ///
    /// A `NULL` literal falls back to the type-derived default.
    pub fn resolve_default(&self) -> Value {
        match &self.default {
            ColumnDefault::CurrentTimestamp => Value::now(),
            ColumnDefault::Value(v) if !v.is_null() => v.clone(),
            _ => self.column_type.fallback_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_declared_types() {
        assert_eq!(ColumnType::parse("int(11) unsigned"), ColumnType::Integer);
        assert_eq!(ColumnType::parse("VARCHAR(64)"), ColumnType::Text);
        assert_eq!(ColumnType::parse("tinyint(1)"), ColumnType::Bool);
        assert_eq!(ColumnType::parse("decimal(10,2)"), ColumnType::Decimal);
        assert_eq!(ColumnType::parse("datetime"), ColumnType::Timestamp);
        assert_eq!(
            ColumnType::parse("blob"),
            ColumnType::Other("blob".to_string())
        );
    }

    #[test]
    fn defaults_fall_back_by_type() {
        let name = Column::new("name", ColumnType::Text);
        assert_eq!(name.resolve_default(), Value::from(""));

        let money = Column::new("money", ColumnType::Integer).with_default(100);
        assert_eq!(money.resolve_default(), Value::Integer(100));

        let nulled = Column::new("active", ColumnType::Bool).with_default(Value::Null);
        assert_eq!(nulled.resolve_default(), Value::Bool(false));

        let created = Column::new("created", ColumnType::Timestamp).current_timestamp();
        assert!(matches!(created.resolve_default(), Value::Timestamp(_)));
    }
}
