pub mod config;
pub mod context;
pub mod io;
pub mod model;
pub mod state;
