#[allow(clippy::all)]
pub mod segflow_proto {
    tonic::include_proto!("segflow");
}

mod convert;

pub use convert::*;
pub use segflow_proto::*;
