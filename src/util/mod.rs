//! General utility modules for use all over the code base.
pub mod ext_serde;
