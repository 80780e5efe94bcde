pub mod dependencies;
pub mod tabfile;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testutils;
