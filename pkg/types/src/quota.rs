use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Error produced when a quota string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("invalid {class} quota '{raw}': {reason}")]
    InvalidQuotaFormat {
        raw: String,
        class: QuotaClass,
        reason: &'static str,
    },
}

/// Unit class of a quota magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaClass {
    Cpu,
    Memory,
}

impl fmt::Display for QuotaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaClass::Cpu => write!(f, "cpu"),
            QuotaClass::Memory => write!(f, "memory"),
        }
    }
}

const KI: u64 = 1 << 10;
const MI: u64 = 1 << 20;
const GI: u64 = 1 << 30;
const TI: u64 = 1 << 40;

/// Binary units tried by `format`, largest first.
const BINARY_UNITS: &[(&str, u64)] = &[("Ti", TI), ("Gi", GI), ("Mi", MI), ("Ki", KI)];

/// A normalized quota magnitude.
///
/// CPU is held in millicores, memory in bytes. Values of the same class are
/// totally ordered; comparing across classes is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuotaValue {
    class: QuotaClass,
    amount: u64,
}

impl QuotaValue {
    /// Parse a CPU (`2`, `500m`) or memory (`4Gi`, `512M`, `1048576`) quota string.
    pub fn parse(raw: &str, class: QuotaClass) -> Result<Self, QuotaError> {
        let invalid = |reason| QuotaError::InvalidQuotaFormat {
            raw: raw.to_string(),
            class,
            reason,
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty value"));
        }
        if trimmed.starts_with('-') {
            return Err(invalid("negative magnitude"));
        }

        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, suffix) = trimmed.split_at(split);
        if digits.is_empty() {
            return Err(invalid("expected an integer magnitude"));
        }
        let magnitude: u64 = digits.parse().map_err(|_| invalid("magnitude out of range"))?;

        let multiplier = match class {
            QuotaClass::Cpu => match suffix {
                "" => 1000,
                "m" => 1,
                _ => return Err(invalid("cpu accepts whole cores or an 'm' suffix")),
            },
            QuotaClass::Memory => match suffix {
                "" => 1,
                "Ki" => KI,
                "Mi" => MI,
                "Gi" => GI,
                "Ti" => TI,
                "K" => 1_000,
                "M" => 1_000_000,
                "G" => 1_000_000_000,
                "T" => 1_000_000_000_000,
                _ => return Err(invalid("unknown memory suffix")),
            },
        };

        let amount = magnitude
            .checked_mul(multiplier)
            .ok_or_else(|| invalid("magnitude out of range"))?;
        Ok(Self { class, amount })
    }

    /// Build a CPU value directly from millicores.
    pub fn cpu_millis(millis: u64) -> Self {
        Self {
            class: QuotaClass::Cpu,
            amount: millis,
        }
    }

    /// Build a memory value directly from bytes.
    pub fn memory_bytes(bytes: u64) -> Self {
        Self {
            class: QuotaClass::Memory,
            amount: bytes,
        }
    }

    pub fn class(&self) -> QuotaClass {
        self.class
    }

    /// Canonical magnitude: millicores for CPU, bytes for memory.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Compare two values of the same class.
    ///
    /// # Panics
    /// Panics when the classes differ.
    pub fn compare(&self, other: &QuotaValue) -> Ordering {
        assert_eq!(
            self.class, other.class,
            "cannot compare {} quota with {} quota",
            self.class, other.class
        );
        self.amount.cmp(&other.amount)
    }

    /// Canonical string form used for display and write payloads.
    pub fn format(&self) -> String {
        match self.class {
            QuotaClass::Cpu => {
                if self.amount % 1000 == 0 {
                    (self.amount / 1000).to_string()
                } else {
                    format!("{}m", self.amount)
                }
            }
            QuotaClass::Memory => {
                if self.amount == 0 {
                    return "0".to_string();
                }
                for (suffix, unit) in BINARY_UNITS {
                    if self.amount % unit == 0 {
                        return format!("{}{}", self.amount / unit, suffix);
                    }
                }
                self.amount.to_string()
            }
        }
    }
}

impl PartialOrd for QuotaValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.class == other.class).then(|| self.amount.cmp(&other.amount))
    }
}

impl fmt::Display for QuotaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl Serialize for QuotaValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One of the four enforceable quota fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaField {
    CpuLimit,
    MemoryLimit,
    CpuReservation,
    MemoryReservation,
}

impl QuotaField {
    /// All fields, in diff/render order.
    pub const ALL: [QuotaField; 4] = [
        QuotaField::CpuLimit,
        QuotaField::MemoryLimit,
        QuotaField::CpuReservation,
        QuotaField::MemoryReservation,
    ];

    pub fn class(&self) -> QuotaClass {
        match self {
            QuotaField::CpuLimit | QuotaField::CpuReservation => QuotaClass::Cpu,
            QuotaField::MemoryLimit | QuotaField::MemoryReservation => QuotaClass::Memory,
        }
    }

    /// Configuration key, e.g. `cpu_limit`.
    pub fn key(&self) -> &'static str {
        match self {
            QuotaField::CpuLimit => "cpu_limit",
            QuotaField::MemoryLimit => "memory_limit",
            QuotaField::CpuReservation => "cpu_reservation",
            QuotaField::MemoryReservation => "memory_reservation",
        }
    }

    /// Human label used in rendered tables.
    pub fn label(&self) -> &'static str {
        match self {
            QuotaField::CpuLimit => "CPU Limit",
            QuotaField::MemoryLimit => "Memory Limit",
            QuotaField::CpuReservation => "CPU Reservation",
            QuotaField::MemoryReservation => "Memory Reservation",
        }
    }
}

impl fmt::Display for QuotaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// CPU/memory limits and reservations.
///
/// In desired state a `None` field is not enforced; in observed state it
/// means the resource has no value set for that field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<QuotaValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<QuotaValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_reservation: Option<QuotaValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<QuotaValue>,
}

impl QuotaSpec {
    pub fn get(&self, field: QuotaField) -> Option<QuotaValue> {
        match field {
            QuotaField::CpuLimit => self.cpu_limit,
            QuotaField::MemoryLimit => self.memory_limit,
            QuotaField::CpuReservation => self.cpu_reservation,
            QuotaField::MemoryReservation => self.memory_reservation,
        }
    }

    /// Return a copy with `field` replaced.
    pub fn with(mut self, field: QuotaField, value: Option<QuotaValue>) -> Self {
        debug_assert!(value.is_none_or(|v| v.class() == field.class()));
        match field {
            QuotaField::CpuLimit => self.cpu_limit = value,
            QuotaField::MemoryLimit => self.memory_limit = value,
            QuotaField::CpuReservation => self.cpu_reservation = value,
            QuotaField::MemoryReservation => self.memory_reservation = value,
        }
        self
    }

    /// Parse one field from its string form and set it.
    pub fn with_parsed(self, field: QuotaField, raw: &str) -> Result<Self, QuotaError> {
        let value = QuotaValue::parse(raw, field.class())?;
        Ok(self.with(field, Some(value)))
    }

    pub fn is_empty(&self) -> bool {
        QuotaField::ALL.iter().all(|f| self.get(*f).is_none())
    }

    /// A spec carrying only the listed fields of `self`.
    pub fn restricted_to(&self, fields: impl IntoIterator<Item = QuotaField>) -> Self {
        fields
            .into_iter()
            .fold(QuotaSpec::default(), |acc, f| acc.with(f, self.get(f)))
    }

    /// Set fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (QuotaField, QuotaValue)> + '_ {
        QuotaField::ALL
            .into_iter()
            .filter_map(|f| self.get(f).map(|v| (f, v)))
    }
}
