use std::fmt;

use crate::{BindingError, NativeDimension, NativeTensorSpec, Result, TensorType};

/// One axis of a declared tensor shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dimension {
    Fixed(usize),
    /// Any size is accepted.
    Any,
    /// Named dynamic axis; every use of the same symbol within one call
    /// must resolve to the same size.
    Symbol(String),
}

impl Dimension {
    pub const NATIVE_ANY: i64 = -1;
    pub const NATIVE_SYMBOL: i64 = -2;

    pub fn symbol(name: impl Into<String>) -> Self {
        Dimension::Symbol(name.into())
    }

    pub fn value(&self) -> Option<usize> {
        match self {
            Dimension::Fixed(v) => Some(*v),
            _ => None,
        }
    }

    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            Dimension::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn from_native(dim: &NativeDimension) -> Result<Self> {
        match dim.value {
            v if v >= 0 => Ok(Dimension::Fixed(v as usize)),
            Self::NATIVE_ANY => Ok(Dimension::Any),
            Self::NATIVE_SYMBOL => match &dim.symbol {
                Some(s) => Ok(Dimension::Symbol(s.clone())),
                None => Err(BindingError::Native {
                    op: "get_specs",
                    message: "symbolic dimension without a symbol name".to_string(),
                }),
            },
            other => Err(BindingError::Native {
                op: "get_specs",
                message: format!("invalid dimension value {other}"),
            }),
        }
    }

    pub fn to_native(&self) -> NativeDimension {
        match self {
            Dimension::Fixed(v) => NativeDimension::fixed(*v as i64),
            Dimension::Any => NativeDimension::any(),
            Dimension::Symbol(s) => NativeDimension::symbol(s.clone()),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(v) => write!(f, "{v}"),
            Dimension::Any => f.write_str("None"),
            Dimension::Symbol(s) => f.write_str(s),
        }
    }
}

/// Declared name/type/shape of one model input or output slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorSpec {
    pub name: String,
    pub tensor_type: TensorType,
    pub dims: Vec<Dimension>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, tensor_type: TensorType, dims: Vec<Dimension>) -> Self {
        Self {
            name: name.into(),
            tensor_type,
            dims,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn from_native(spec: &NativeTensorSpec) -> Result<Self> {
        Ok(Self {
            name: spec.name.clone(),
            tensor_type: TensorType::from_code(spec.type_code)?,
            dims: spec
                .dims
                .iter()
                .map(Dimension::from_native)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    pub fn to_native(&self) -> NativeTensorSpec {
        NativeTensorSpec {
            name: self.name.clone(),
            type_code: self.tensor_type.code(),
            dims: self.dims.iter().map(Dimension::to_native).collect(),
        }
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}[", self.name, self.tensor_type)?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specs_compare_value_for_value_and_symbol_for_symbol() {
        let a = TensorSpec::new(
            "x",
            TensorType::Float32,
            vec![Dimension::symbol("batch_size"), Dimension::Any],
        );
        let b = TensorSpec::new(
            "x",
            TensorType::Float32,
            vec![Dimension::symbol("batch_size"), Dimension::Any],
        );
        let c = TensorSpec::new(
            "x",
            TensorType::Float32,
            vec![Dimension::symbol("num_items"), Dimension::Any],
        );
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "x: float32[batch_size, None]");
    }

    #[test]
    fn native_dimension_codes() {
        assert_eq!(
            Dimension::from_native(&NativeDimension::fixed(3)).unwrap(),
            Dimension::Fixed(3)
        );
        assert_eq!(
            Dimension::from_native(&NativeDimension::any()).unwrap(),
            Dimension::Any
        );
        assert_eq!(
            Dimension::from_native(&NativeDimension::symbol("n")).unwrap(),
            Dimension::symbol("n")
        );
        let broken = NativeDimension {
            value: Dimension::NATIVE_SYMBOL,
            symbol: None,
        };
        assert!(Dimension::from_native(&broken).is_err());
        assert!(Dimension::from_native(&NativeDimension::fixed(-7)).is_err());
    }

    #[test]
    fn specs_cross_the_boundary_unchanged() {
        let spec = TensorSpec::new(
            "features",
            TensorType::Int64,
            vec![Dimension::symbol("batch"), Dimension::Any, Dimension::Fixed(8)],
        );
        let native = spec.to_native();
        assert_eq!(native.type_code, TensorType::Int64.code());
        assert_eq!(
            native.dims,
            vec![
                NativeDimension::symbol("batch"),
                NativeDimension::any(),
                NativeDimension::fixed(8)
            ]
        );
        assert_eq!(TensorSpec::from_native(&native).unwrap(), spec);
    }

    #[test]
    fn symbolic_dims_carry_no_value() {
        let dim = Dimension::symbol("batch");
        assert_eq!(dim.value(), None);
        assert_eq!(dim.symbol_name(), Some("batch"));
        assert_eq!(Dimension::Fixed(4).symbol_name(), None);
    }
}
