// Debugger configuration loading

pub mod mapping;
pub mod settings;

pub use mapping::{MappingPair, PathMapper};
pub use settings::DebugSettings;
