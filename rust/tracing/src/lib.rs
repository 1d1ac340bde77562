pub mod init_tracer;

pub use init_tracer::*;
