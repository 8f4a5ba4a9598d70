mod dispatcher;
mod operation;
mod params;

pub use dispatcher::{JobDispatcher, JobResult};
pub use operation::{Operation, UnknownOperation};
pub use params::FlagParams;
