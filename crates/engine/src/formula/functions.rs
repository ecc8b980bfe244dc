// Built-in functions: arithmetic operators plus min/max

use thiserror::Error;

/// Runtime evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("function '{name}' does not accept {got} argument(s)")]
    Arity { name: String, got: usize },
    #[error("result is not a finite number")]
    NonFinite,
}

/// Check if a function name is a known built-in function.
/// Names must be lower-case (as produced by the parser).
pub fn is_known_function(name: &str) -> bool {
    matches!(name, "+" | "-" | "*" | "/" | "min" | "max")
}

/// Apply a built-in to already-evaluated arguments.
///
/// Dispatch is on `(name, arity)`: `-` with one argument is negation, with two
/// it is subtraction.
pub fn apply(name: &str, args: &[f64]) -> Result<f64, EvalError> {
    let arity = || EvalError::Arity { name: name.to_string(), got: args.len() };

    let result = match (name, args) {
        ("+", [a, b]) => a + b,
        ("-", [a]) => -a,
        ("-", [a, b]) => a - b,
        ("*", [a, b]) => a * b,
        ("/", [_, b]) if *b == 0.0 => return Err(EvalError::DivisionByZero),
        ("/", [a, b]) => a / b,
        ("min", [first, rest @ ..]) => rest.iter().copied().fold(*first, f64::min),
        ("max", [first, rest @ ..]) => rest.iter().copied().fold(*first, f64::max),
        _ if is_known_function(name) => return Err(arity()),
        _ => return Err(EvalError::UnknownFunction { name: name.to_string() }),
    };

    if result == 0.0 {
        // -0.0 would print as "-0" and compare equal to the value it replaced
        Ok(0.0)
    } else if result.is_finite() {
        Ok(result)
    } else {
        Err(EvalError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        assert_eq!(apply("+", &[2.0, 3.0]), Ok(5.0));
        assert_eq!(apply("-", &[2.0, 3.0]), Ok(-1.0));
        assert_eq!(apply("-", &[2.0]), Ok(-2.0));
        assert_eq!(apply("*", &[2.0, 3.0]), Ok(6.0));
        assert_eq!(apply("/", &[3.0, 2.0]), Ok(1.5));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(apply("/", &[1.0, 0.0]), Err(EvalError::DivisionByZero));
        assert_eq!(apply("/", &[0.0, -0.0]), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_min_max_variadic() {
        assert_eq!(apply("min", &[4.0]), Ok(4.0));
        assert_eq!(apply("min", &[4.0, -1.0, 7.0]), Ok(-1.0));
        assert_eq!(apply("max", &[4.0, -1.0, 7.0]), Ok(7.0));
    }

    #[test]
    fn test_arity_errors() {
        assert_eq!(apply("max", &[]), Err(EvalError::Arity { name: "max".into(), got: 0 }));
        assert_eq!(apply("+", &[1.0]), Err(EvalError::Arity { name: "+".into(), got: 1 }));
        assert_eq!(apply("-", &[1.0, 2.0, 3.0]), Err(EvalError::Arity { name: "-".into(), got: 3 }));
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(apply("sum", &[1.0]), Err(EvalError::UnknownFunction { name: "sum".into() }));
    }

    #[test]
    fn test_negative_zero_is_normalized() {
        for result in [apply("-", &[0.0]), apply("*", &[-1.0, 0.0]), apply("/", &[-0.0, 5.0]), apply("min", &[-0.0])] {
            assert_eq!(result.map(f64::to_bits), Ok(0.0f64.to_bits()));
        }
    }

    #[test]
    fn test_overflow_is_non_finite() {
        assert_eq!(apply("*", &[f64::MAX, 2.0]), Err(EvalError::NonFinite));
    }
}
