pub mod package;
pub mod stream;

pub use package::checksum;
pub use stream::{StreamWriter, WriterSettings};
