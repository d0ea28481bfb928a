mod r#impl;
mod structs;

pub use r#impl::{get_config, load_config, set_config};
pub use structs::*;
