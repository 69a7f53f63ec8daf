use super::schema::TypeId;

/// Maximum number of bytes a string value may hold.
pub const STRING_LEN: usize = 128;

const LEN_PREFIX_SIZE: usize = std::mem::size_of::<u32>();

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
    Integer(i32),
    String(String),
}

impl Value {
    /// parses a value of the given type from bytes
    pub fn parse_value(bytes: &[u8], type_id: TypeId) -> Self {
        match type_id {
            TypeId::Integer => {
                let val = i32::from_be_bytes(bytes[..4].try_into().unwrap());
                Value::Integer(val)
            }
            TypeId::Text => {
                let len = u32::from_be_bytes(bytes[..LEN_PREFIX_SIZE].try_into().unwrap()) as usize;
                let len = len.min(STRING_LEN);
                let slice = &bytes[LEN_PREFIX_SIZE..LEN_PREFIX_SIZE + len];
                Value::String(String::from_utf8_lossy(slice).into_owned())
            }
        }
    }

    /// Writes the value using the fixed width encoding of its type.
    /// Strings are zero padded up to `STRING_LEN` bytes.
    pub fn serialize_value(&self, buffer: &mut [u8]) {
        match self {
            Value::Integer(val) => {
                buffer[..std::mem::size_of::<i32>()].copy_from_slice(val.to_be_bytes().as_slice())
            }
            Value::String(val) => {
                let bytes = val.as_bytes();
                buffer[..LEN_PREFIX_SIZE].copy_from_slice(&(bytes.len() as u32).to_be_bytes());
                let data = &mut buffer[LEN_PREFIX_SIZE..LEN_PREFIX_SIZE + STRING_LEN];
                data[..bytes.len()].copy_from_slice(bytes);
                data[bytes.len()..].fill(0);
            }
        }
    }

    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Integer(_) => TypeId::Integer,
            Value::String(_) => TypeId::Text,
        }
    }

    /// Returns true if the value can be stored in a field of the given type.
    pub fn fits(&self, type_id: TypeId) -> bool {
        match self {
            Value::String(val) => type_id == TypeId::Text && val.as_bytes().len() <= STRING_LEN,
            Value::Integer(_) => type_id == TypeId::Integer,
        }
    }

    pub fn as_str(&self) -> &str {
        match &self {
            Value::String(val) => val,
            _ => unreachable!(),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Value::Integer(val) => *val,
            _ => unreachable!(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(val) => write!(f, "{val}"),
            Value::String(val) => write!(f, "{val}"),
        }
    }
}
