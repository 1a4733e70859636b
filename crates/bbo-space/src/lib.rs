pub mod pack;
pub mod template;

pub use pack::*;
pub use template::*;
