//! Controller inputs: the named parameters gameplay code feeds to a blend
//! tree every frame.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum InputType {
    Float = 0,
    Bool = 1,
    I32 = 2,
}

impl InputType {
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Float),
            1 => Some(Self::Bool),
            2 => Some(Self::I32),
            _ => None,
        }
    }

    #[must_use]
    pub fn default_value(self) -> InputValue {
        match self {
            Self::Float => InputValue::Float(0.0),
            Self::Bool => InputValue::Bool(false),
            Self::I32 => InputValue::I32(0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputDecl {
    pub name: String,
    pub ty: InputType,
}

impl InputDecl {
    #[must_use]
    pub fn new(name: &str, ty: InputType) -> Self {
        Self {
            name: name.to_owned(),
            ty,
        }
    }
}

/// Current value of one input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputValue {
    Float(f32),
    Bool(bool),
    I32(i32),
}

impl InputValue {
    #[must_use]
    pub fn ty(self) -> InputType {
        match self {
            Self::Float(_) => InputType::Float,
            Self::Bool(_) => InputType::Bool,
            Self::I32(_) => InputType::I32,
        }
    }

    /// Numeric view: bools map to `0.0` / `1.0`.
    #[must_use]
    pub fn as_f32(self) -> f32 {
        match self {
            Self::Float(v) => v,
            Self::Bool(v) => f32::from(u8::from(v)),
            Self::I32(v) => v as f32,
        }
    }
}

/// Looks up an input by name.
#[must_use]
pub fn find_input(inputs: &[InputDecl], name: &str) -> Option<usize> {
    inputs.iter().position(|i| i.name == name)
}
