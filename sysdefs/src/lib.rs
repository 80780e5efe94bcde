//! Plain system definitions shared by the device graph, the planner and the
//! OS utilities: filesystem types, partition tables and mount identifiers.

pub mod filesystems;
pub mod mount;
pub mod partitions;
