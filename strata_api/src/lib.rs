pub mod config;
pub mod constants;
pub mod devicegraph;
pub mod error;
pub mod region;
pub mod sid;

pub use region::Region;
pub use sid::Sid;
