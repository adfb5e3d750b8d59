//! Purpose: Decode stored bytes as big-endian unsigned integers and compare them.
//! Exports: `Operator`, `decode_be`, `encode_be`, `evaluate`.
//! Role: Leaf of the table scanner; pure and engine-agnostic.
//! Invariants: Comparison reads `threshold <op> decoded`, never the reverse.
//! Invariants: Empty values decode to zero; values wider than 16 bytes keep their
//! low 16 bytes.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Operator {
    pub fn token(self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            "==" | "=" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            other => Err(Error::new(ErrorKind::InvalidPredicateOperator)
                .with_message(format!("unknown comparison operator `{other}`"))
                .with_hint("Use one of >, >=, <, <=, ==, !=.")),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Decodes `value` as a big-endian unsigned integer of its own length.
///
/// Leading zero bytes are ignored; `None` when more than 16 significant bytes remain.
pub fn decode_be(value: &[u8]) -> Option<u128> {
    let significant = significant_bytes(value);
    if significant.len() > 16 {
        return None;
    }
    Some(
        significant
            .iter()
            .fold(0u128, |acc, byte| (acc << 8) | u128::from(*byte)),
    )
}

fn significant_bytes(value: &[u8]) -> &[u8] {
    let first = value
        .iter()
        .position(|byte| *byte != 0)
        .unwrap_or(value.len());
    &value[first..]
}

/// Minimal big-endian encoding; zero encodes as a single zero byte.
pub fn encode_be(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes
        .iter()
        .position(|byte| *byte != 0)
        .unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

/// `threshold <op> decode_be(value)`.
pub fn evaluate(op: Operator, threshold: i64, value: &[u8]) -> bool {
    // Values too wide for u128 exceed every i64 threshold.
    let ordering = match (u128::try_from(threshold), decode_be(value)) {
        (Ok(threshold), Some(decoded)) => threshold.cmp(&decoded),
        _ => Ordering::Less,
    };
    op.holds(ordering)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_big_endian_of_own_length() {
        assert_eq!(decode_be(&[]), Some(0));
        assert_eq!(decode_be(&[0x01]), Some(1));
        assert_eq!(decode_be(&[0x4e, 0x12]), Some(19986));
        assert_eq!(decode_be(&[0x00, 0x00, 0x01, 0x00]), Some(256));
        assert_eq!(decode_be(&[0x40; 16]), Some(u128::from_be_bytes([0x40; 16])));
    }

    #[test]
    fn leading_zeros_do_not_count_toward_width() {
        let mut value = vec![0u8; 20];
        value.push(7);
        assert_eq!(decode_be(&value), Some(7));
        assert!(evaluate(Operator::Eq, 7, &value));
    }

    #[test]
    fn wide_values_exceed_every_threshold() {
        let mut value = vec![0x01];
        value.extend_from_slice(&[0u8; 16]);
        assert_eq!(decode_be(&value), None);
        for threshold in [i64::MIN, -1, 0, 1, i64::MAX] {
            assert!(evaluate(Operator::Lt, threshold, &value));
            assert!(evaluate(Operator::Le, threshold, &value));
            assert!(evaluate(Operator::Ne, threshold, &value));
            assert!(!evaluate(Operator::Eq, threshold, &value));
            assert!(!evaluate(Operator::Gt, threshold, &value));
            assert!(!evaluate(Operator::Ge, threshold, &value));
        }
    }

    #[test]
    fn encode_is_minimal() {
        assert_eq!(encode_be(0), vec![0]);
        assert_eq!(encode_be(19986), vec![0x4e, 0x12]);
        assert_eq!(decode_be(&encode_be(u64::MAX)), Some(u128::from(u64::MAX)));
    }

    #[test]
    fn threshold_is_the_left_operand() {
        let value = encode_be(10);
        assert!(evaluate(Operator::Gt, 11, &value));
        assert!(!evaluate(Operator::Gt, 9, &value));
        assert!(evaluate(Operator::Lt, 9, &value));
        assert!(evaluate(Operator::Ge, 10, &value));
        assert!(evaluate(Operator::Le, 10, &value));
        assert!(evaluate(Operator::Eq, 10, &value));
        assert!(evaluate(Operator::Ne, 11, &value));
        assert!(!evaluate(Operator::Ne, 10, &value));
    }

    #[test]
    fn negative_thresholds_sort_below_every_value() {
        assert!(evaluate(Operator::Lt, -1, &[]));
        assert!(!evaluate(Operator::Eq, -1, &[]));
        assert!(evaluate(Operator::Ne, -1, &[0]));
    }

    #[test]
    fn operator_tokens_parse() {
        for (token, op) in [
            (">", Operator::Gt),
            (">=", Operator::Ge),
            ("<", Operator::Lt),
            ("<=", Operator::Le),
            ("==", Operator::Eq),
            ("=", Operator::Eq),
            ("!=", Operator::Ne),
        ] {
            assert_eq!(token.parse::<Operator>().expect("token"), op);
        }
        let err = "~".parse::<Operator>().expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::InvalidPredicateOperator);
    }
}
