//! Trellis Analyzer — JavaScript front-end for the analysis pipeline

pub mod facts;
pub mod parsing;
pub mod plugins;


pub use facts::{
    module_name, module_node_id, ArgFact, CallFact, ClassFact, FileFacts, FunctionFact,
    ImportFact, ParsedSources, SymbolIndex, SymbolRef, VariableFact,
};
pub use parsing::parse_file;
pub use plugins::register_default_plugins;
