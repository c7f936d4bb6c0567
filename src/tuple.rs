use std::cmp::Ordering;
use std::fmt::{self, Display};

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::storage::entity::RecordId;

/// Longest string a `Str` field can hold, in bytes.
pub const STRING_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tuple ({found}) does not match schema ({expected})")]
    SchemaMismatch { expected: String, found: String },
    #[error("string of {0} bytes exceeds the {} byte limit", STRING_LEN)]
    StringTooLong(usize),
    #[error(transparent)]
    Codec(#[from] bincode::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int,
    Str,
}

impl Type {
    /// Bytes one field of this type occupies inside a slot.
    pub fn len(self) -> usize {
        match self {
            Type::Int => 4,
            // u64 length prefix + payload
            Type::Str => 8 + STRING_LEN,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("INT"),
            Type::Str => f.write_str("STRING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn ty(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::Str,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(v) => Some(*v),
            Field::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Str(s) => Some(s),
            Field::Int(_) => None,
        }
    }

    /// Orders two fields of the same type; fields of different types are
    /// incomparable.
    pub fn compare(&self, other: &Field) -> Option<Ordering> {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => Some(a.cmp(b)),
            (Field::Str(a), Field::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Field::Int(v)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::Str(s.to_owned())
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TdItem {
    pub ty: Type,
    pub name: Option<String>,
}

/// Schema of a tuple. Two descriptors are equal when their types match
/// position by position; names do not take part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(types: &[Type], names: &[&str]) -> Self {
        let items = types
            .iter()
            .enumerate()
            .map(|(i, &ty)| TdItem {
                ty,
                name: names.get(i).map(|name| name.to_string()),
            })
            .collect();
        Self { items }
    }

    pub fn from_types(types: &[Type]) -> Self {
        Self::new(types, &[])
    }

    pub fn combine(first: &TupleDesc, second: &TupleDesc) -> TupleDesc {
        let items = first.items.iter().chain(&second.items).cloned().collect();
        TupleDesc { items }
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> Option<Type> {
        self.items.get(i).map(|item| item.ty)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.items.get(i).and_then(|item| item.name.as_deref())
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    pub fn types(&self) -> impl Iterator<Item = Type> + '_ {
        self.items.iter().map(|item| item.ty)
    }

    /// Width of one encoded tuple.
    pub fn byte_width(&self) -> usize {
        self.types().map(Type::len).sum()
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.num_fields() == other.num_fields() && self.types().eq(other.types())
    }
}

impl Eq for TupleDesc {}

impl Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}({})", item.ty, item.name.as_deref().unwrap_or("null"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            record_id: None,
        }
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    pub fn conforms_to(&self, desc: &TupleDesc) -> bool {
        self.fields.len() == desc.num_fields()
            && self.fields.iter().map(Field::ty).eq(desc.types())
    }

    fn type_list(&self) -> String {
        self.fields
            .iter()
            .map(|field| field.ty().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str("\t")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}

fn options() -> impl Options {
    bincode::options()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// Writes `tuple` into `slot` (exactly `desc.byte_width()` bytes), each field
/// zero padded to its type width.
pub fn encode(desc: &TupleDesc, tuple: &Tuple, slot: &mut [u8]) -> Result<(), Error> {
    if !tuple.conforms_to(desc) {
        return Err(Error::SchemaMismatch {
            expected: desc.types().map(|ty| ty.to_string()).collect::<Vec<_>>().join(", "),
            found: tuple.type_list(),
        });
    }
    slot.fill(0);
    let mut offset = 0;
    for field in &tuple.fields {
        let width = field.ty().len();
        let mut out = &mut slot[offset..offset + width];
        match field {
            Field::Int(v) => options().serialize_into(&mut out, v)?,
            Field::Str(s) => {
                if s.len() > STRING_LEN {
                    return Err(Error::StringTooLong(s.len()));
                }
                options().serialize_into(&mut out, s)?
            }
        }
        offset += width;
    }
    Ok(())
}

pub fn decode(desc: &TupleDesc, slot: &[u8]) -> Result<Tuple, Error> {
    let mut fields = Vec::with_capacity(desc.num_fields());
    let mut offset = 0;
    for ty in desc.types() {
        let bytes = &slot[offset..offset + ty.len()];
        let field = match ty {
            Type::Int => Field::Int(options().deserialize(bytes)?),
            Type::Str => Field::Str(options().deserialize(bytes)?),
        };
        fields.push(field);
        offset += ty.len();
    }
    Ok(Tuple::new(fields))
}
