//! Library crate for kmodinfo, a kernel module introspection tool

pub mod backend;
pub mod error;
pub mod kernel;

// CLI modules
pub mod cli {
    pub mod args;
}

// Plugin modules
pub mod plugins;

// Format modules
pub mod formats {
    pub mod csv;
    pub mod json;
    pub mod jsonl;
    pub mod text;
    pub mod traits;
}
