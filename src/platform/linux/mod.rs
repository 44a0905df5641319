pub mod mounts;
pub mod namespaces;
pub mod process;
pub mod stack;
