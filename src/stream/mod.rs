pub mod buffer;
pub mod dispatcher;
