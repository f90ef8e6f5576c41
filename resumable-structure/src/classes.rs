use crate::descriptors::{DescriptorError, MethodDescriptor};
use crate::instructions::{Instr, Label};
use crate::types::internal_name;

pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const ABSTRACT: u16 = 0x0400;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Class {
    pub access: u16,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub methods: Vec<Method>,
}

impl Class {
    pub fn implements(&self, interface: &str) -> bool {
        let interface = internal_name(interface);
        self.interfaces.iter().any(|i| *i == interface)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name && m.descriptor == descriptor)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Method {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    /// Number of local slots the body may address, parameters included.
    pub max_locals: u16,
    pub code: Code,
}

impl Method {
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    pub fn signature(&self) -> Result<MethodDescriptor, DescriptorError> {
        MethodDescriptor::parse(&self.descriptor)
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Code {
    pub instrs: Vec<Instr>,
    pub try_catch: Vec<TryCatchBlock>,
}

impl Code {
    /// Highest label id defined or referenced, if any.
    pub fn max_label(&self) -> Option<u32> {
        let defined = self.instrs.iter().flat_map(|i| {
            let mut ls = i.branch_targets();
            if let Instr::Label(l) = i {
                ls.push(*l);
            }
            ls
        });
        let regions = self.try_catch.iter().flat_map(|t| vec![t.start, t.end, t.handler]);
        defined.chain(regions).map(|Label(n)| n).max()
    }
}

/// Protected range `[start, end)` whose exceptions of `catch_type` (any if
/// `None`) continue at `handler`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryCatchBlock {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub catch_type: Option<String>,
}
