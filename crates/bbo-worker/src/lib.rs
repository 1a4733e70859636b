pub mod config;
pub mod consumer;
pub mod doctor;
pub mod process;
pub mod state;
pub mod util;
pub mod worker;
pub mod workspace;

pub use config::*;
pub use consumer::*;
pub use doctor::*;
pub use process::*;
pub use state::*;
pub use util::*;
pub use worker::*;
pub use workspace::*;
