//! Type descriptors for fields and expressions
//!
//! Every expression the checker touches gets a `TypeDesc`: a data type, an
//! expression kind (scalar vs. aggregate vs. analytic), and the eval space
//! the value is computed in. The generator later uses the eval space to
//! decide what may be pushed into a grouped query.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Data types a field or expression can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Variable-length text
    String,
    /// Numeric (integer or floating point; dialects pick the physical type)
    Number,
    /// Calendar date
    Date,
    /// Point in time
    Timestamp,
    /// Boolean
    Boolean,
    /// A nested row shape
    Record,
    /// A repeated value (nest results are repeated records)
    Array,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::String
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => write!(f, "string"),
            DataType::Number => write!(f, "number"),
            DataType::Date => write!(f, "date"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Record => write!(f, "record"),
            DataType::Array => write!(f, "array"),
        }
    }
}

/// Error when parsing a data type string
#[derive(Debug, Clone)]
pub struct ParseDataTypeError {
    pub input: String,
}

impl fmt::Display for ParseDataTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unknown data type '{}'. Valid options: string, number, date, timestamp, boolean, record, array",
            self.input
        )
    }
}

impl std::error::Error for ParseDataTypeError {}

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "text" | "varchar" | "char" => Ok(DataType::String),
            "number" | "int" | "integer" | "bigint" | "float" | "double" | "decimal" | "numeric" => {
                Ok(DataType::Number)
            }
            "date" => Ok(DataType::Date),
            "timestamp" | "datetime" => Ok(DataType::Timestamp),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "record" | "struct" => Ok(DataType::Record),
            "array" | "repeated" => Ok(DataType::Array),
            _ => Err(ParseDataTypeError {
                input: s.to_string(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DataType::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl DataType {
    /// Check if this is a numeric type
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Number)
    }

    /// Check if this is a temporal type (date or timestamp)
    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }

    /// Check if values of this type can be compared with `<`/`>` etc.
    pub fn is_orderable(&self) -> bool {
        !matches!(self, DataType::Record | DataType::Array)
    }
}

// ============================================================================
// Expression kind and eval space
// ============================================================================

/// The kind of computation an expression performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpressionType {
    /// Row-by-row value
    Scalar,
    /// Aggregated over the grouping of the enclosing stage
    Aggregate,
    /// Aggregated while escaping one or more grouping dimensions
    UngroupedAggregate,
    /// Window function over a partition/ordering
    Analytic,
}

impl ExpressionType {
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            ExpressionType::Aggregate | ExpressionType::UngroupedAggregate
        )
    }
}

impl fmt::Display for ExpressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionType::Scalar => write!(f, "scalar"),
            ExpressionType::Aggregate => write!(f, "aggregate"),
            ExpressionType::UngroupedAggregate => write!(f, "ungrouped-aggregate"),
            ExpressionType::Analytic => write!(f, "analytic"),
        }
    }
}

/// Where a value is computed relative to the stage boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalSpace {
    /// Known without reading any row
    Constant,
    /// Computed from stage input rows
    Input,
    /// Computed from stage output (post-aggregation)
    Output,
}

impl EvalSpace {
    /// Combine the spaces of two operands: output wins, then input.
    pub fn merge(self, other: EvalSpace) -> EvalSpace {
        use EvalSpace::*;
        match (self, other) {
            (Output, _) | (_, Output) => Output,
            (Input, _) | (_, Input) => Input,
            (Constant, Constant) => Constant,
        }
    }
}

impl fmt::Display for EvalSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalSpace::Constant => write!(f, "constant"),
            EvalSpace::Input => write!(f, "input"),
            EvalSpace::Output => write!(f, "output"),
        }
    }
}

/// Full type descriptor of an expression or field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDesc {
    pub data_type: DataType,
    pub expression_type: ExpressionType,
    pub eval_space: EvalSpace,
}

impl TypeDesc {
    /// A scalar value read from input rows
    pub fn scalar(data_type: DataType) -> Self {
        TypeDesc {
            data_type,
            expression_type: ExpressionType::Scalar,
            eval_space: EvalSpace::Input,
        }
    }

    /// A constant scalar (literals)
    pub fn constant(data_type: DataType) -> Self {
        TypeDesc {
            data_type,
            expression_type: ExpressionType::Scalar,
            eval_space: EvalSpace::Constant,
        }
    }

    /// An aggregate value, computed in the output space
    pub fn aggregate(data_type: DataType) -> Self {
        TypeDesc {
            data_type,
            expression_type: ExpressionType::Aggregate,
            eval_space: EvalSpace::Output,
        }
    }

    /// An analytic (window) value
    pub fn analytic(data_type: DataType) -> Self {
        TypeDesc {
            data_type,
            expression_type: ExpressionType::Analytic,
            eval_space: EvalSpace::Output,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.expression_type == ExpressionType::Scalar
    }

    pub fn is_aggregate(&self) -> bool {
        self.expression_type.is_aggregate()
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.expression_type, self.data_type, self.eval_space
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_types() {
        assert_eq!("string".parse::<DataType>().unwrap(), DataType::String);
        assert_eq!("NUMBER".parse::<DataType>().unwrap(), DataType::Number);
        assert_eq!("date".parse::<DataType>().unwrap(), DataType::Date);
        assert_eq!("timestamp".parse::<DataType>().unwrap(), DataType::Timestamp);
        assert_eq!("boolean".parse::<DataType>().unwrap(), DataType::Boolean);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("varchar".parse::<DataType>().unwrap(), DataType::String);
        assert_eq!("bigint".parse::<DataType>().unwrap(), DataType::Number);
        assert_eq!("double".parse::<DataType>().unwrap(), DataType::Number);
        assert_eq!("bool".parse::<DataType>().unwrap(), DataType::Boolean);
        assert_eq!("datetime".parse::<DataType>().unwrap(), DataType::Timestamp);
        assert_eq!("struct".parse::<DataType>().unwrap(), DataType::Record);
    }

    #[test]
    fn test_parse_unknown() {
        assert!("geography".parse::<DataType>().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        for dt in [DataType::String, DataType::Number, DataType::Array] {
            let json = serde_json::to_string(&dt).unwrap();
            let parsed: DataType = serde_json::from_str(&json).unwrap();
            assert_eq!(dt, parsed);
        }
    }

    #[test]
    fn test_type_predicates() {
        assert!(DataType::Number.is_numeric());
        assert!(!DataType::String.is_numeric());
        assert!(DataType::Date.is_temporal());
        assert!(DataType::Timestamp.is_temporal());
        assert!(!DataType::Number.is_temporal());
        assert!(!DataType::Array.is_orderable());
        assert!(DataType::String.is_orderable());
    }

    #[test]
    fn test_eval_space_merge() {
        assert_eq!(EvalSpace::Constant.merge(EvalSpace::Constant), EvalSpace::Constant);
        assert_eq!(EvalSpace::Constant.merge(EvalSpace::Input), EvalSpace::Input);
        assert_eq!(EvalSpace::Input.merge(EvalSpace::Output), EvalSpace::Output);
        assert_eq!(EvalSpace::Output.merge(EvalSpace::Constant), EvalSpace::Output);
    }

    #[test]
    fn test_type_desc_constructors() {
        let t = TypeDesc::constant(DataType::Number);
        assert!(t.is_scalar());
        assert_eq!(t.eval_space, EvalSpace::Constant);

        let a = TypeDesc::aggregate(DataType::Number);
        assert!(a.is_aggregate());
        assert_eq!(a.eval_space, EvalSpace::Output);
        assert_eq!(a.to_string(), "aggregate number (output)");
    }
}
