//! Data model of the resumable method transform: a JVM-shaped instruction
//! set, the class container, type descriptors, the instrumentation
//! configuration and the names of the runtime services that rewritten code
//! calls into.

pub mod types;
pub mod descriptors;
pub mod instructions;
pub mod classes;
pub mod config;
pub mod contract;
