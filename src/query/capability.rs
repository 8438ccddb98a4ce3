//! Provider capability profiles.
//!
//! A profile is an immutable flag → value map declared once per provider. Every
//! lookup falls back to the most conservative value when the provider did not
//! declare the flag, so an empty profile describes a provider that supports
//! nothing beyond plain relational composition.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use time::macros::datetime;
use time::PrimitiveDateTime;

/// Recognised capability flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CapabilityFlag {
    /// Mixed numeric kinds compare strictly by type.
    StrictEquality,
    /// Bits of integer precision available server-side.
    IntegerPrecision,
    /// ANSI-declared strings can be bound as ANSI parameters.
    SupportsAnsi,
    /// Unicode data in ANSI fields may be down-converted on read.
    SupportsUnicodeToAnsiConversion,
    /// Unbounded strings may take part in server-side comparisons.
    SupportsLargeStringComparisons,
    /// Binary members may be compared for equality or used as join keys.
    SupportsBinaryKeys,
    /// Decimal members may be compared server-side.
    SupportsDecimalComparisons,
    /// Correlated (dependent) joins can be expressed.
    SupportsCrossApply,
    /// Offset-aware temporals can be compared, decomposed, and bound.
    SupportsDateTimeOffset,
    /// Zero-value temporal sentinel.
    DefaultDateTime,
}

impl CapabilityFlag {
    /// Every recognised flag, in declaration order.
    pub const ALL: [CapabilityFlag; 10] = [
        CapabilityFlag::StrictEquality,
        CapabilityFlag::IntegerPrecision,
        CapabilityFlag::SupportsAnsi,
        CapabilityFlag::SupportsUnicodeToAnsiConversion,
        CapabilityFlag::SupportsLargeStringComparisons,
        CapabilityFlag::SupportsBinaryKeys,
        CapabilityFlag::SupportsDecimalComparisons,
        CapabilityFlag::SupportsCrossApply,
        CapabilityFlag::SupportsDateTimeOffset,
        CapabilityFlag::DefaultDateTime,
    ];

    /// Configuration key for this flag.
    pub fn key(self) -> &'static str {
        match self {
            CapabilityFlag::StrictEquality => "strict_equality",
            CapabilityFlag::IntegerPrecision => "integer_precision",
            CapabilityFlag::SupportsAnsi => "supports_ansi",
            CapabilityFlag::SupportsUnicodeToAnsiConversion => {
                "supports_unicode_to_ansi_conversion"
            }
            CapabilityFlag::SupportsLargeStringComparisons => "supports_large_string_comparisons",
            CapabilityFlag::SupportsBinaryKeys => "supports_binary_keys",
            CapabilityFlag::SupportsDecimalComparisons => "supports_decimal_comparisons",
            CapabilityFlag::SupportsCrossApply => "supports_cross_apply",
            CapabilityFlag::SupportsDateTimeOffset => "supports_date_time_offset",
            CapabilityFlag::DefaultDateTime => "default_date_time",
        }
    }

    fn expects(self) -> ValueKind {
        match self {
            CapabilityFlag::IntegerPrecision => ValueKind::Int,
            CapabilityFlag::DefaultDateTime => ValueKind::DateTime,
            _ => ValueKind::Bool,
        }
    }
}

impl fmt::Display for CapabilityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for CapabilityFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityFlag::ALL
            .into_iter()
            .find(|flag| flag.key() == s)
            .ok_or_else(|| format!("unknown capability flag '{s}'"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ValueKind {
    Bool,
    Int,
    DateTime,
}

/// Value attached to a capability flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityValue {
    /// Boolean capability.
    Bool(bool),
    /// Small integer capability (precision in bits).
    Int(u8),
    /// Temporal sentinel.
    DateTime(PrimitiveDateTime),
}

impl CapabilityValue {
    fn kind(&self) -> ValueKind {
        match self {
            CapabilityValue::Bool(_) => ValueKind::Bool,
            CapabilityValue::Int(_) => ValueKind::Int,
            CapabilityValue::DateTime(_) => ValueKind::DateTime,
        }
    }
}

/// Conservative integer precision assumed when a provider declares none.
pub const DEFAULT_INTEGER_PRECISION: u8 = 32;

/// Temporal sentinel assumed when a provider declares none.
pub const DEFAULT_DATE_TIME: PrimitiveDateTime = datetime!(0001-01-01 00:00:00);

/// Immutable, per-provider description of supported semantics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilityProfile {
    name: String,
    values: BTreeMap<CapabilityFlag, CapabilityValue>,
}

impl CapabilityProfile {
    /// Starts a builder for a named profile.
    pub fn builder(name: impl Into<String>) -> CapabilityProfileBuilder {
        CapabilityProfileBuilder {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Starts a builder seeded with this profile's declarations.
    pub fn extend(&self, name: impl Into<String>) -> CapabilityProfileBuilder {
        CapabilityProfileBuilder {
            name: name.into(),
            values: self.values.clone(),
        }
    }

    /// Profile of a provider that declared nothing.
    pub fn conservative(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    /// Embedded relational store: no ANSI strings, no decimal comparisons,
    /// no offset temporals, no cross apply.
    pub fn sqlite() -> Self {
        Self::builder("sqlite")
            .flag(CapabilityFlag::StrictEquality, false)
            .integer_precision(64)
            .flag(CapabilityFlag::SupportsAnsi, false)
            .flag(CapabilityFlag::SupportsUnicodeToAnsiConversion, true)
            .flag(CapabilityFlag::SupportsLargeStringComparisons, true)
            .flag(CapabilityFlag::SupportsBinaryKeys, true)
            .flag(CapabilityFlag::SupportsDecimalComparisons, false)
            .flag(CapabilityFlag::SupportsCrossApply, false)
            .flag(CapabilityFlag::SupportsDateTimeOffset, false)
            .build()
    }

    /// Full-featured relational server.
    pub fn sql_server() -> Self {
        Self::builder("sql_server")
            .flag(CapabilityFlag::StrictEquality, false)
            .integer_precision(64)
            .flag(CapabilityFlag::SupportsAnsi, true)
            .flag(CapabilityFlag::SupportsUnicodeToAnsiConversion, true)
            .flag(CapabilityFlag::SupportsLargeStringComparisons, false)
            .flag(CapabilityFlag::SupportsBinaryKeys, true)
            .flag(CapabilityFlag::SupportsDecimalComparisons, true)
            .flag(CapabilityFlag::SupportsCrossApply, true)
            .flag(CapabilityFlag::SupportsDateTimeOffset, true)
            .build()
    }

    /// Document store with 53-bit numbers and Unicode-only strings.
    pub fn cosmos() -> Self {
        Self::builder("cosmos")
            .flag(CapabilityFlag::StrictEquality, true)
            .integer_precision(53)
            .flag(CapabilityFlag::SupportsAnsi, false)
            .flag(CapabilityFlag::SupportsUnicodeToAnsiConversion, false)
            .flag(CapabilityFlag::SupportsLargeStringComparisons, true)
            .flag(CapabilityFlag::SupportsBinaryKeys, true)
            .flag(CapabilityFlag::SupportsDecimalComparisons, true)
            .flag(CapabilityFlag::SupportsCrossApply, false)
            .flag(CapabilityFlag::SupportsDateTimeOffset, true)
            .default_date_time(DEFAULT_DATE_TIME)
            .build()
    }

    /// Provider name the profile was declared for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw lookup; `None` when the provider left the flag undeclared.
    pub fn get(&self, flag: CapabilityFlag) -> Option<CapabilityValue> {
        self.values.get(&flag).copied()
    }

    /// Declared flags in flag order.
    pub fn declared(&self) -> impl Iterator<Item = (CapabilityFlag, CapabilityValue)> + '_ {
        self.values.iter().map(|(flag, value)| (*flag, *value))
    }

    fn bool_flag(&self, flag: CapabilityFlag, default: bool) -> bool {
        match self.values.get(&flag) {
            Some(CapabilityValue::Bool(v)) => *v,
            _ => default,
        }
    }

    /// Whether mixed numeric comparisons need explicit casts. Defaults to `true`.
    pub fn strict_equality(&self) -> bool {
        self.bool_flag(CapabilityFlag::StrictEquality, true)
    }

    /// Integer precision in bits, clamped to `1..=64`.
    pub fn integer_precision(&self) -> u8 {
        match self.values.get(&CapabilityFlag::IntegerPrecision) {
            Some(CapabilityValue::Int(bits)) => (*bits).clamp(1, 64),
            _ => DEFAULT_INTEGER_PRECISION,
        }
    }

    /// Inclusive signed integer range representable server-side.
    pub fn integer_range(&self) -> (i64, i64) {
        let bits = u32::from(self.integer_precision());
        if bits >= 64 {
            return (i64::MIN, i64::MAX);
        }
        let max = (1i64 << (bits - 1)) - 1;
        (-max - 1, max)
    }

    /// Whether ANSI parameters are supported.
    pub fn supports_ansi(&self) -> bool {
        self.bool_flag(CapabilityFlag::SupportsAnsi, false)
    }

    /// Whether Unicode data in ANSI fields may be converted on read.
    pub fn supports_unicode_to_ansi_conversion(&self) -> bool {
        self.bool_flag(CapabilityFlag::SupportsUnicodeToAnsiConversion, false)
    }

    /// Whether unbounded strings may be compared server-side.
    pub fn supports_large_string_comparisons(&self) -> bool {
        self.bool_flag(CapabilityFlag::SupportsLargeStringComparisons, false)
    }

    /// Whether binary members may be used as keys.
    pub fn supports_binary_keys(&self) -> bool {
        self.bool_flag(CapabilityFlag::SupportsBinaryKeys, false)
    }

    /// Whether decimal members may be compared server-side.
    pub fn supports_decimal_comparisons(&self) -> bool {
        self.bool_flag(CapabilityFlag::SupportsDecimalComparisons, false)
    }

    /// Whether correlated joins can be expressed.
    pub fn supports_cross_apply(&self) -> bool {
        self.bool_flag(CapabilityFlag::SupportsCrossApply, false)
    }

    /// Whether offset-aware temporals can be used server-side.
    pub fn supports_date_time_offset(&self) -> bool {
        self.bool_flag(CapabilityFlag::SupportsDateTimeOffset, false)
    }

    /// Zero-value temporal sentinel.
    pub fn default_date_time(&self) -> PrimitiveDateTime {
        match self.values.get(&CapabilityFlag::DefaultDateTime) {
            Some(CapabilityValue::DateTime(value)) => *value,
            _ => DEFAULT_DATE_TIME,
        }
    }
}

/// Builder used once per provider at startup.
#[derive(Debug)]
pub struct CapabilityProfileBuilder {
    name: String,
    values: BTreeMap<CapabilityFlag, CapabilityValue>,
}

impl CapabilityProfileBuilder {
    /// Declares a boolean flag. Non-boolean flags are ignored.
    pub fn flag(mut self, flag: CapabilityFlag, enabled: bool) -> Self {
        if flag.expects() == ValueKind::Bool {
            self.values.insert(flag, CapabilityValue::Bool(enabled));
        }
        self
    }

    /// Declares the integer precision in bits.
    pub fn integer_precision(mut self, bits: u8) -> Self {
        self.values
            .insert(CapabilityFlag::IntegerPrecision, CapabilityValue::Int(bits));
        self
    }

    /// Declares the temporal sentinel.
    pub fn default_date_time(mut self, value: PrimitiveDateTime) -> Self {
        self.values.insert(
            CapabilityFlag::DefaultDateTime,
            CapabilityValue::DateTime(value),
        );
        self
    }

    /// Declares an arbitrary flag value, rejecting values of the wrong kind.
    pub fn set(mut self, flag: CapabilityFlag, value: CapabilityValue) -> Result<Self, String> {
        if flag.expects() != value.kind() {
            return Err(format!("capability flag '{flag}' does not accept {value:?}"));
        }
        self.values.insert(flag, value);
        Ok(self)
    }

    /// Freezes the profile.
    pub fn build(self) -> CapabilityProfile {
        CapabilityProfile {
            name: self.name,
            values: self.values,
        }
    }
}
