/// Scalar element types a `Value` can carry. This is the vectorizer's whole
/// type system: no aggregates, no pointers-to-struct, nothing the host's own
/// IR wouldn't already have resolved to a scalar lane type by the time a
/// block reaches the packer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
    Void,
}

impl IrType {
    pub fn size(&self) -> usize {
        match self {
            IrType::I8 => 1,
            IrType::I16 => 2,
            IrType::I32 => 4,
            IrType::I64 | IrType::Ptr => 8,
            IrType::F32 => 4,
            IrType::F64 => 8,
            IrType::Void => 0,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64)
    }

    /// Whether this type can ever be a lane of a vector pack. `Void` shows
    /// up only on instructions with no destination (e.g. a bare `Store`).
    pub fn is_scalar_element(&self) -> bool {
        !matches!(self, IrType::Void)
    }
}
