use crate::decl::{ClassId, MethodDecl, MethodId};

/// Offsets stored in a slot must fit the 57-bit range a packed word leaves for them.
pub const MAX_COMPONENT_OFFSET: i64 = 1 << 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtorKind {
    /// Destroys the object without freeing it
    Complete,
    /// Destroys the object and releases its storage
    Deleting,
}

/// Something that can be called: a member function, or one variant of a destructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalDecl {
    pub method: MethodId,
    pub dtor: Option<DtorKind>,
}

impl GlobalDecl {
    pub fn method(method: MethodId) -> Self {
        Self { method, dtor: None }
    }

    pub fn dtor(method: MethodId, kind: DtorKind) -> Self {
        Self {
            method,
            dtor: Some(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    VCallOffset,
    VBaseOffset,
    OffsetToTop,
    Rtti,
    FunctionPointer,
    CompleteDtorPointer,
    DeletingDtorPointer,
    UnusedFunctionPointer,
}

/// A single machine-word entry in a vtable.
///
/// Offsets and declaration references live in separate variants, so a slot
/// can never pair a kind with the wrong payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VTableComponent {
    VCallOffset(i64),
    VBaseOffset(i64),
    OffsetToTop(i64),
    Rtti(ClassId),
    FunctionPointer(MethodId),
    CompleteDtorPointer(MethodId),
    DeletingDtorPointer(MethodId),
    /// A slot that is allocated but never called through.
    UnusedFunctionPointer(MethodId),
}

fn checked_offset(offset: i64) -> i64 {
    assert!(offset < MAX_COMPONENT_OFFSET, "Offset is too big!");
    assert!(offset >= -MAX_COMPONENT_OFFSET, "Offset is too small!");
    offset
}

impl VTableComponent {
    pub fn make_vcall_offset(offset: i64) -> Self {
        Self::VCallOffset(checked_offset(offset))
    }

    pub fn make_vbase_offset(offset: i64) -> Self {
        Self::VBaseOffset(checked_offset(offset))
    }

    pub fn make_offset_to_top(offset: i64) -> Self {
        Self::OffsetToTop(checked_offset(offset))
    }

    pub fn make_rtti(class: ClassId) -> Self {
        Self::Rtti(class)
    }

    pub fn make_function(method: &MethodDecl) -> Self {
        assert!(!method.is_destructor(), "Don't use make_function with destructors!");
        Self::FunctionPointer(method.id)
    }

    pub fn make_complete_dtor(dtor: &MethodDecl) -> Self {
        assert!(dtor.is_destructor(), "make_complete_dtor needs a destructor");
        Self::CompleteDtorPointer(dtor.id)
    }

    pub fn make_deleting_dtor(dtor: &MethodDecl) -> Self {
        assert!(dtor.is_destructor(), "make_deleting_dtor needs a destructor");
        Self::DeletingDtorPointer(dtor.id)
    }

    pub fn make_unused_function(method: &MethodDecl) -> Self {
        assert!(!method.is_destructor(), "Don't use make_unused_function with destructors!");
        Self::UnusedFunctionPointer(method.id)
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::VCallOffset(_) => ComponentKind::VCallOffset,
            Self::VBaseOffset(_) => ComponentKind::VBaseOffset,
            Self::OffsetToTop(_) => ComponentKind::OffsetToTop,
            Self::Rtti(_) => ComponentKind::Rtti,
            Self::FunctionPointer(_) => ComponentKind::FunctionPointer,
            Self::CompleteDtorPointer(_) => ComponentKind::CompleteDtorPointer,
            Self::DeletingDtorPointer(_) => ComponentKind::DeletingDtorPointer,
            Self::UnusedFunctionPointer(_) => ComponentKind::UnusedFunctionPointer,
        }
    }

    pub fn vcall_offset(&self) -> i64 {
        match self {
            Self::VCallOffset(offset) => *offset,
            other => panic!("Invalid component kind {:?}, expected VCallOffset", other.kind()),
        }
    }

    pub fn vbase_offset(&self) -> i64 {
        match self {
            Self::VBaseOffset(offset) => *offset,
            other => panic!("Invalid component kind {:?}, expected VBaseOffset", other.kind()),
        }
    }

    pub fn offset_to_top(&self) -> i64 {
        match self {
            Self::OffsetToTop(offset) => *offset,
            other => panic!("Invalid component kind {:?}, expected OffsetToTop", other.kind()),
        }
    }

    pub fn rtti_decl(&self) -> ClassId {
        match self {
            Self::Rtti(class) => *class,
            other => panic!("Invalid component kind {:?}, expected Rtti", other.kind()),
        }
    }

    /// Target of any function-pointer kind, including unused slots.
    pub fn function_decl(&self) -> MethodId {
        match self {
            Self::FunctionPointer(m)
            | Self::CompleteDtorPointer(m)
            | Self::DeletingDtorPointer(m)
            | Self::UnusedFunctionPointer(m) => *m,
            other => panic!("Invalid component kind {:?}, expected a function pointer", other.kind()),
        }
    }

    pub fn destructor_decl(&self) -> MethodId {
        match self {
            Self::CompleteDtorPointer(m) | Self::DeletingDtorPointer(m) => *m,
            other => panic!("Invalid component kind {:?}, expected a destructor", other.kind()),
        }
    }

    pub fn unused_function_decl(&self) -> MethodId {
        match self {
            Self::UnusedFunctionPointer(m) => *m,
            other => panic!("Invalid component kind {:?}, expected UnusedFunctionPointer", other.kind()),
        }
    }

    pub fn is_destructor_kind(&self) -> bool {
        matches!(self, Self::CompleteDtorPointer(_) | Self::DeletingDtorPointer(_))
    }

    pub fn is_used_function_pointer_kind(&self) -> bool {
        matches!(self, Self::FunctionPointer(_)) || self.is_destructor_kind()
    }

    pub fn is_function_pointer_kind(&self) -> bool {
        self.is_used_function_pointer_kind() || matches!(self, Self::UnusedFunctionPointer(_))
    }

    pub fn is_rtti_kind(&self) -> bool {
        matches!(self, Self::Rtti(_))
    }

    /// The callable a used function-pointer slot dispatches to.
    pub fn global_decl(&self) -> GlobalDecl {
        match self {
            Self::FunctionPointer(m) => GlobalDecl::method(*m),
            Self::CompleteDtorPointer(m) => GlobalDecl::dtor(*m, DtorKind::Complete),
            Self::DeletingDtorPointer(m) => GlobalDecl::dtor(*m, DtorKind::Deleting),
            other => panic!("GlobalDecl can be created only from virtual function, got {:?}", other.kind()),
        }
    }
}
