pub mod model;
pub mod run;
pub mod snapshot;
