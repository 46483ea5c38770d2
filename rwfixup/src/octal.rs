// SPDX-FileCopyrightText: 2026 rwfixup contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Deserialize file modes written either as a TOML integer (`0o755`) or as an
//! octal string (`"755"`, `"0755"`, `"0o755"`). Plain decimal integers are
//! taken at face value.

use std::{fmt, marker::PhantomData};

use num_traits::{NumCast, PrimInt};
use serde::{Deserializer, de::Visitor};

/// Largest value that fits in the permission and special bits of a mode.
const MODE_MAX: u64 = 0o7777;

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: PrimInt,
{
    struct ModeVisitor<T>(PhantomData<T>);

    impl<T> ModeVisitor<T>
    where
        T: PrimInt,
    {
        fn check<E: serde::de::Error>(value: u64) -> Result<T, E> {
            if value > MODE_MAX {
                return Err(E::custom(format!("mode out of range: {value:o}")));
            }

            <T as NumCast>::from(value)
                .ok_or_else(|| E::custom(format!("mode does not fit: {value:o}")))
        }
    }

    impl<T> Visitor<'_> for ModeVisitor<T>
    where
        T: PrimInt,
    {
        type Value = T;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "an octal integer or a string containing an octal number")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Self::check(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let value = u64::try_from(value)
                .map_err(|_| E::custom(format!("mode cannot be negative: {value}")))?;
            Self::check(value)
        }

        fn visit_str<E>(self, data: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let digits = data.strip_prefix("0o").unwrap_or(data);
            let value = u64::from_str_radix(digits, 8).map_err(E::custom)?;
            Self::check(value)
        }
    }

    deserializer.deserialize_any(ModeVisitor(PhantomData))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestData {
        #[serde(deserialize_with = "super::deserialize")]
        mode: u32,
    }

    fn parse(data: &str) -> Result<u32, toml_edit::de::Error> {
        toml_edit::de::from_str::<TestData>(data).map(|d| d.mode)
    }

    #[test]
    fn accepted_forms() {
        assert_eq!(parse("mode = 0o755").unwrap(), 0o755);
        assert_eq!(parse("mode = \"755\"").unwrap(), 0o755);
        assert_eq!(parse("mode = \"0755\"").unwrap(), 0o755);
        assert_eq!(parse("mode = \"0o644\"").unwrap(), 0o644);
    }

    #[test]
    fn rejected_forms() {
        assert!(parse("mode = 8192").is_err());
        assert!(parse("mode = \"789\"").is_err());
        assert!(parse("mode = -1").is_err());
        assert!(parse("mode = \"17777\"").is_err());
    }
}
