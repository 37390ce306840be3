//! P0 types and their memory layout.
//!
//! Scalars are `boolean` (1 unit) and `integer` (4 units). Aggregates are
//! arrays and records built from them; their layout is computed once, when
//! the type is constructed, and shared by every binding of that type.

use std::fmt;
use std::rc::Rc;

pub const BOOLEAN_SIZE: u32 = 1;
pub const INTEGER_SIZE: u32 = 4;

// ── Type representation ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Boolean,
    Integer,
    /// The error type. Produced during recovery and accepted wherever a
    /// type is checked, so a single mistake is reported once.
    None,
    Array(Rc<ArrayType>),
    Record(Rc<RecordType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayType {
    pub base: Type,
    pub lower: i32,
    pub length: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    pub fields: Vec<Field>,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub offset: u32,
}

impl Type {
    /// Build an array type over `base` indexed by `lower..lower+length`.
    pub fn array(base: Type, lower: i32, length: i32) -> Type {
        Type::Array(Rc::new(ArrayType { base, lower, length }))
    }

    /// Build a record type, assigning each field its offset as the running
    /// total of the sizes before it.
    pub fn record<I>(fields: I) -> Type
    where
        I: IntoIterator<Item = (String, Type)>,
    {
        let mut size: u32 = 0;
        let fields = fields
            .into_iter()
            .map(|(name, ty)| {
                let offset = size;
                size = size.saturating_add(ty.size());
                Field { name, ty, offset }
            })
            .collect();
        Type::Record(Rc::new(RecordType { fields, size }))
    }

    /// Size in memory units.
    pub fn size(&self) -> u32 {
        match self {
            Type::Boolean => BOOLEAN_SIZE,
            Type::Integer => INTEGER_SIZE,
            Type::None => 0,
            Type::Array(array) => array.size(),
            Type::Record(record) => record.size,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Boolean | Type::Integer)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array(_) | Type::Record(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::None)
    }

    /// Equality that lets the error type through.
    pub fn compatible(&self, other: &Type) -> bool {
        self.is_error() || other.is_error() || self == other
    }
}

impl ArrayType {
    pub fn element_size(&self) -> u32 {
        self.base.size()
    }

    pub fn size(&self) -> u32 {
        (self.length.max(0) as u32).saturating_mul(self.element_size())
    }

    pub fn contains(&self, index: i32) -> bool {
        let (index, lower) = (index as i64, self.lower as i64);
        index >= lower && index < lower + self.length as i64
    }

    /// Offset of a constant index from the start of the array. The index
    /// must be in range.
    pub fn offset_of(&self, index: i32) -> u32 {
        (index - self.lower) as u32 * self.element_size()
    }
}

impl RecordType {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Boolean => write!(f, "boolean"),
            Type::Integer => write!(f, "integer"),
            Type::None => write!(f, "<error>"),
            Type::Array(a) => {
                let upper = a.lower as i64 + a.length as i64 - 1;
                write!(f, "array [{}..{}] of {}", a.lower, upper, a.base)
            }
            Type::Record(r) => {
                write!(f, "record ")?;
                for (i, field) in r.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                write!(f, " end")
            }
        }
    }
}
